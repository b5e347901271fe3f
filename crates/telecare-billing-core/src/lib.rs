//! Core types for telecare billing.
//!
//! This crate holds everything about payment reconciliation that does not touch I/O:
//!
//! - **Identifiers**: `UserId`, `PlanId`, `GatewayReference`, `TransactionId`, `SubscriptionId`
//! - **Catalog**: `Plan`, `SessionCredits`, `Currency`
//! - **Ledger**: `PaymentTransaction`, `LedgerUpdate`, `Transition`, `ReviewFlag`
//! - **Subscriptions**: `Subscription`, `SubscriptionState`, `ActivationKind`
//! - **Gateway boundary**: `NotificationPayload`, status `normalize`
//! - **Reconciliation**: `AmountReconciler`
//!
//! # Amounts
//!
//! Amounts are `rust_decimal::Decimal` in the major unit of their currency (kwacha, not
//! tambala). Tolerance arithmetic is exact; nothing is ever converted to floating point.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod ids;
pub mod money;
pub mod notification;
pub mod plan;
pub mod reconcile;
pub mod status;
pub mod subscription;
pub mod transaction;

pub use config::{EngineConfig, DEFAULT_EVENT_TYPES};
pub use ids::{
    GatewayReference, IdError, PlanId, SubscriptionId, TransactionId, UserId, MAX_REFERENCE_LEN,
};
pub use money::{
    checked_amount, Currency, InvalidAmount, InvalidCurrency, AMOUNT_INTEGER_DIGITS, AMOUNT_SCALE,
};
pub use notification::{NotificationError, NotificationPayload};
pub use plan::{Plan, SessionCredits};
pub use reconcile::{AmountReconciler, InvalidTolerance, ReconcileRejection, Reconciliation};
pub use status::{normalize, TransactionStatus, UnknownStoredStatus};
pub use subscription::{ActivationKind, Subscription, SubscriptionState};
pub use transaction::{LedgerUpdate, PaymentTransaction, ReviewFlag, ReviewKind, Transition};
