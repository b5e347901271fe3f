//! Request and response types for the telecare billing API.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use telecare_billing_core::{
    Currency, Plan, PlanId, ReviewFlag, ReviewKind, SessionCredits, TransactionStatus, UserId,
};

/// Request to open a checkout.
#[derive(Debug, Clone, Serialize)]
pub struct InitiatePaymentRequest {
    /// Paying user.
    pub user_id: UserId,
    /// Plan being purchased.
    pub plan_id: PlanId,
}

/// A ledger row as reported by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    /// Internal row id.
    pub id: String,
    /// Gateway reference (`tx_ref`).
    pub reference: String,
    /// Gateway-side charge id, once known.
    pub gateway_transaction_id: Option<String>,
    /// Amount in major units.
    pub amount: Decimal,
    /// Currency code.
    pub currency: String,
    /// Lifecycle status.
    pub status: TransactionStatus,
    /// Resolved user.
    pub user_id: Option<UserId>,
    /// Resolved plan.
    pub plan_id: Option<PlanId>,
    /// Payment method label.
    pub payment_method: Option<String>,
    /// Payment channel label.
    pub payment_channel: Option<String>,
    /// Manual-review marker.
    pub review: Option<ReviewFlag>,
    /// How many gateway notifications touched this row.
    pub delivery_count: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Gateway payment time.
    pub paid_at: Option<DateTime<Utc>>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Whether the gateway confirmed the payment.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }

    /// Whether the row is waiting on operator review.
    #[must_use]
    pub fn needs_review(&self) -> bool {
        self.review.is_some()
    }
}

/// One page of a user's payments.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionPage {
    /// Rows, newest first.
    pub transactions: Vec<Transaction>,
    /// Whether more rows exist past this page.
    pub has_more: bool,
}

/// A user's active subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    /// Subscription id.
    pub id: String,
    /// Owning user.
    pub user_id: UserId,
    /// Catalog plan, absent when activated from a snapshot of a removed plan.
    pub plan_id: Option<PlanId>,
    /// Plan name at purchase time.
    pub plan_name: String,
    /// Plan price at purchase time.
    pub plan_price: Decimal,
    /// Plan currency.
    pub plan_currency: String,
    /// Start of validity.
    pub start_date: DateTime<Utc>,
    /// End of validity.
    pub end_date: DateTime<Utc>,
    /// Remaining session credits.
    pub credits: SessionCredits,
    /// Credits granted over the subscription's lifetime.
    pub total_credits: SessionCredits,
    /// Reference of the payment that last funded the subscription.
    pub funding_reference: Option<String>,
}

impl Subscription {
    /// Whether the subscription covers `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.start_date <= now && now < self.end_date
    }
}

/// Catalog listing.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanList {
    /// Plans ordered by id.
    pub plans: Vec<Plan>,
}

/// API error response body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorBody,
}

/// API error details.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Additional details.
    pub details: Option<serde_json::Value>,
}
