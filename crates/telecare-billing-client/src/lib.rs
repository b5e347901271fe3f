//! Telecare Billing Client SDK.
//!
//! Used by the telecare app backend to open checkouts, follow their ledger state and ask
//! whether a user may book sessions.
//!
//! # Example
//!
//! ```no_run
//! use telecare_billing_client::BillingClient;
//! use telecare_billing_core::{PlanId, UserId};
//!
//! # async fn example() -> Result<(), telecare_billing_client::ClientError> {
//! let client = BillingClient::new("http://telecare-billing:8080", "your-service-api-key")?;
//! let user = UserId::new(11).expect("positive id");
//!
//! // Open a checkout and hand the reference to the gateway as `tx_ref`.
//! let checkout = client.initiate_payment(user, PlanId::new(5).expect("positive id")).await?;
//! println!("tx_ref = {}", checkout.reference);
//!
//! // Later: may this user book a session?
//! if let Some(subscription) = client.current_subscription(user).await? {
//!     println!("{} video sessions left", subscription.credits.video);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{BillingClient, ClientOptions};
pub use error::ClientError;
pub use types::*;
