//! Telecare billing HTTP service.
//!
//! This crate hosts the payment webhook reconciliation engine and its HTTP surface:
//!
//! - Signed gateway notifications (`/webhooks/payments`)
//! - Checkout initiation and ledger lookups for the app backend
//! - Subscription status for session scheduling
//! - Catalog administration and the review queue
//!
//! # Authentication
//!
//! 1. **Body signature** - HMAC-SHA256 of the raw body with the gateway signing key
//! 2. **Service API key** - app backend requests (`X-API-Key`)
//! 3. **Admin API key** - catalog, users, review queue, test webhook (`X-Admin-Key`)

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::unused_async)]

pub mod auth;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use engine::{EngineReport, Outcome, WebhookReconciliationEngine};
pub use error::{ApiError, EngineError};
pub use routes::create_router;
pub use state::AppState;
