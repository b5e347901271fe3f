//! Payment ledger entries.
//!
//! A [`PaymentTransaction`] exists once per gateway reference. Every notification for that
//! reference is folded into the same row with [`PaymentTransaction::merge`], which only ever
//! moves the status forward.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Currency, GatewayReference, Plan, PlanId, TransactionId, TransactionStatus, UserId};

/// A ledger entry for one gateway payment attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    /// Internal row id.
    pub id: TransactionId,

    /// Idempotency key assigned by the gateway (or by us at initiation).
    pub gateway_reference: GatewayReference,

    /// Secondary correlation id from the gateway (`charge_id`).
    pub gateway_transaction_id: Option<String>,

    /// Amount reported by the gateway, or the catalog price for a placeholder.
    pub amount: Decimal,

    /// Currency of `amount`.
    pub currency: Currency,

    /// Normalized lifecycle status.
    pub status: TransactionStatus,

    /// Payment method descriptor.
    pub payment_method: Option<String>,

    /// Payment channel descriptor (mobile money operator, card, bank).
    pub payment_channel: Option<String>,

    /// The notification body that last changed this row.
    pub raw_payload: serde_json::Value,

    /// Paying user, once known.
    pub user_id: Option<UserId>,

    /// Purchased plan, once known. Cleared if the plan is deleted.
    pub plan_id: Option<PlanId>,

    /// Plan terms the payment was made against.
    pub plan_snapshot: Option<Plan>,

    /// Set when the row needs manual review instead of activation.
    pub review: Option<ReviewFlag>,

    /// Number of notifications folded into this row.
    pub delivery_count: u32,

    /// When the row was created.
    pub created_at: DateTime<Utc>,

    /// When the gateway reports the payment was made.
    pub paid_at: Option<DateTime<Utc>>,

    /// When the row last changed.
    pub updated_at: DateTime<Utc>,
}

/// Fields carried by one notification, already validated and normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerUpdate {
    /// Idempotency key.
    pub reference: GatewayReference,
    /// Secondary correlation id.
    pub gateway_transaction_id: Option<String>,
    /// Received amount.
    pub amount: Decimal,
    /// Received currency.
    pub currency: Currency,
    /// Normalized status.
    pub status: TransactionStatus,
    /// Payment method descriptor.
    pub payment_method: Option<String>,
    /// Payment channel descriptor.
    pub payment_channel: Option<String>,
    /// Gateway payment time.
    pub paid_at: Option<DateTime<Utc>>,
    /// Paying user from metadata.
    pub user_id: Option<UserId>,
    /// Purchased plan from metadata.
    pub plan_id: Option<PlanId>,
    /// Original notification body.
    pub raw_payload: serde_json::Value,
}

/// What a merge did to the status of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Status did not move (duplicate, still pending, or already terminal).
    Unchanged,
    /// The row just moved from `pending` to `failed`.
    Failed,
    /// A pending row received a completed notification. The caller finalizes it with
    /// [`PaymentTransaction::complete`] or [`PaymentTransaction::flag`] in the same unit of work.
    ToComplete,
}

impl PaymentTransaction {
    /// A fresh pending row for a reference seen for the first time in a notification.
    ///
    /// The notification itself is folded in afterwards with [`Self::merge`].
    #[must_use]
    pub fn open(update: &LedgerUpdate, now: DateTime<Utc>) -> Self {
        Self {
            id: TransactionId::generate(),
            gateway_reference: update.reference.clone(),
            gateway_transaction_id: None,
            amount: update.amount,
            currency: update.currency.clone(),
            status: TransactionStatus::Pending,
            payment_method: None,
            payment_channel: None,
            raw_payload: update.raw_payload.clone(),
            user_id: None,
            plan_id: None,
            plan_snapshot: None,
            review: None,
            delivery_count: 0,
            created_at: now,
            paid_at: None,
            updated_at: now,
        }
    }

    /// A pending placeholder written when a user starts a checkout.
    #[must_use]
    pub fn placeholder(
        reference: GatewayReference,
        user_id: UserId,
        plan: &Plan,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            gateway_reference: reference,
            gateway_transaction_id: None,
            amount: plan.price,
            currency: plan.currency.clone(),
            status: TransactionStatus::Pending,
            payment_method: None,
            payment_channel: None,
            raw_payload: serde_json::Value::Null,
            user_id: Some(user_id),
            plan_id: Some(plan.id),
            plan_snapshot: Some(plan.clone()),
            review: None,
            delivery_count: 0,
            created_at: now,
            paid_at: None,
            updated_at: now,
        }
    }

    /// Fold a notification into this row.
    ///
    /// Descriptors that are still unknown are filled in. Amount, currency and payload are only
    /// refreshed while the row is pending. Identifiers already on the row win over conflicting
    /// metadata. The status never moves backwards and terminal rows never change status.
    pub fn merge(&mut self, update: &LedgerUpdate, now: DateTime<Utc>) -> Transition {
        self.delivery_count = self.delivery_count.saturating_add(1);
        self.updated_at = now;

        fill(&mut self.gateway_transaction_id, &update.gateway_transaction_id);
        fill(&mut self.payment_method, &update.payment_method);
        fill(&mut self.payment_channel, &update.payment_channel);

        if let (Some(existing), Some(incoming)) = (self.user_id, update.user_id) {
            if existing != incoming {
                tracing::warn!(
                    reference = %self.gateway_reference,
                    stored_user_id = %existing,
                    notified_user_id = %incoming,
                    "Notification metadata names a different user, keeping stored value"
                );
            }
        }
        self.user_id = self.user_id.or(update.user_id);

        if let (Some(existing), Some(incoming)) = (self.plan_id, update.plan_id) {
            if existing != incoming {
                tracing::warn!(
                    reference = %self.gateway_reference,
                    stored_plan_id = %existing,
                    notified_plan_id = %incoming,
                    "Notification metadata names a different plan, keeping stored value"
                );
            }
        }
        if self.plan_snapshot.is_none() {
            self.plan_id = self.plan_id.or(update.plan_id);
        }

        if self.status.is_terminal() {
            if update.status != self.status {
                tracing::info!(
                    reference = %self.gateway_reference,
                    stored = %self.status,
                    notified = %update.status,
                    "Ignoring status change on terminal transaction"
                );
            }
            return Transition::Unchanged;
        }

        self.amount = update.amount;
        self.currency = update.currency.clone();
        self.raw_payload = update.raw_payload.clone();
        if update.paid_at.is_some() {
            self.paid_at = update.paid_at;
        }

        match update.status {
            TransactionStatus::Pending => Transition::Unchanged,
            TransactionStatus::Failed => {
                self.status = TransactionStatus::Failed;
                Transition::Failed
            }
            TransactionStatus::Completed => Transition::ToComplete,
        }
    }

    /// Finalize a pending row as completed and clear any earlier review flag.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        debug_assert!(self.status.can_advance_to(TransactionStatus::Completed));
        self.status = TransactionStatus::Completed;
        self.review = None;
        self.paid_at.get_or_insert(now);
        self.updated_at = now;
    }

    /// Keep the row pending and mark it for manual review.
    pub fn flag(&mut self, kind: ReviewKind, detail: impl Into<String>, now: DateTime<Utc>) {
        self.review = Some(ReviewFlag {
            kind,
            detail: detail.into(),
            flagged_at: now,
        });
        self.updated_at = now;
    }

    /// The audit record copied onto a subscription funded by this payment.
    #[must_use]
    pub fn funding_metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "transaction_id": self.id,
            "gateway_reference": self.gateway_reference,
            "gateway_transaction_id": self.gateway_transaction_id,
            "amount": self.amount,
            "currency": self.currency,
            "payment_method": self.payment_method,
            "payment_channel": self.payment_channel,
            "paid_at": self.paid_at,
            "plan_id": self.plan_id,
        })
    }
}

fn fill(slot: &mut Option<String>, incoming: &Option<String>) {
    if slot.is_none() {
        slot.clone_from(incoming);
    }
}

/// A manual-review marker on a ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFlag {
    /// Category of the anomaly.
    pub kind: ReviewKind,
    /// Human-readable detail.
    pub detail: String,
    /// When the anomaly was recorded.
    pub flagged_at: DateTime<Utc>,
}

/// Categories of ledger anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewKind {
    /// Received amount outside the tolerance band.
    AmountAnomaly,
    /// Paid in a different currency than the plan.
    CurrencyMismatch,
    /// Metadata names a user the directory does not know.
    UnknownUser,
    /// No plan could be resolved for the payment.
    UnknownPlan,
}

impl ReviewKind {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AmountAnomaly => "amount_anomaly",
            Self::CurrencyMismatch => "currency_mismatch",
            Self::UnknownUser => "unknown_user",
            Self::UnknownPlan => "unknown_plan",
        }
    }
}

impl fmt::Display for ReviewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "amount_anomaly" => Ok(Self::AmountAnomaly),
            "currency_mismatch" => Ok(Self::CurrencyMismatch),
            "unknown_user" => Ok(Self::UnknownUser),
            "unknown_plan" => Ok(Self::UnknownPlan),
            other => Err(format!("unknown review kind: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionCredits;

    fn update(status: TransactionStatus) -> LedgerUpdate {
        LedgerUpdate {
            reference: GatewayReference::new("REF-1").unwrap(),
            gateway_transaction_id: Some("ch_1".into()),
            amount: Decimal::from(97),
            currency: Currency::new("MWK").unwrap(),
            status,
            payment_method: None,
            payment_channel: Some("Mobile Money".into()),
            paid_at: None,
            user_id: Some(UserId::new(11).unwrap()),
            plan_id: Some(PlanId::new(5).unwrap()),
            raw_payload: serde_json::json!({"status": status.as_str()}),
        }
    }

    fn plan() -> Plan {
        Plan {
            id: PlanId::new(5).unwrap(),
            name: "Monthly".into(),
            price: Decimal::from(100),
            currency: Currency::new("MWK").unwrap(),
            duration_days: 30,
            credits: SessionCredits::new(4, 2, 1),
        }
    }

    #[test]
    fn pending_then_completed_requests_completion() {
        let now = Utc::now();
        let first = update(TransactionStatus::Pending);
        let mut tx = PaymentTransaction::open(&first, now);

        assert_eq!(tx.merge(&first, now), Transition::Unchanged);
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.user_id, Some(UserId::new(11).unwrap()));

        assert_eq!(
            tx.merge(&update(TransactionStatus::Completed), now),
            Transition::ToComplete
        );
        assert_eq!(tx.status, TransactionStatus::Pending);
        tx.complete(now);
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.delivery_count, 2);
    }

    #[test]
    fn completed_rows_never_regress() {
        let now = Utc::now();
        let done = update(TransactionStatus::Completed);
        let mut tx = PaymentTransaction::open(&done, now);
        tx.merge(&done, now);
        tx.complete(now);

        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Failed,
            TransactionStatus::Completed,
        ] {
            assert_eq!(tx.merge(&update(status), now), Transition::Unchanged);
            assert_eq!(tx.status, TransactionStatus::Completed);
        }
    }

    #[test]
    fn failed_is_terminal() {
        let now = Utc::now();
        let failed = update(TransactionStatus::Failed);
        let mut tx = PaymentTransaction::open(&failed, now);

        assert_eq!(tx.merge(&failed, now), Transition::Failed);
        assert_eq!(
            tx.merge(&update(TransactionStatus::Completed), now),
            Transition::Unchanged
        );
        assert_eq!(tx.status, TransactionStatus::Failed);
    }

    #[test]
    fn placeholder_identity_wins_over_notification_metadata() {
        let now = Utc::now();
        let mut tx = PaymentTransaction::placeholder(
            GatewayReference::new("REF-1").unwrap(),
            UserId::new(11).unwrap(),
            &plan(),
            now,
        );
        let mut incoming = update(TransactionStatus::Pending);
        incoming.user_id = Some(UserId::new(12).unwrap());
        incoming.plan_id = Some(PlanId::new(6).unwrap());

        tx.merge(&incoming, now);

        assert_eq!(tx.user_id, Some(UserId::new(11).unwrap()));
        assert_eq!(tx.plan_id, Some(PlanId::new(5).unwrap()));
        assert_eq!(tx.amount, Decimal::from(97));
        assert_eq!(tx.gateway_transaction_id.as_deref(), Some("ch_1"));
    }

    #[test]
    fn flag_keeps_row_pending_and_complete_clears_it() {
        let now = Utc::now();
        let done = update(TransactionStatus::Completed);
        let mut tx = PaymentTransaction::open(&done, now);
        tx.merge(&done, now);

        tx.flag(ReviewKind::AmountAnomaly, "too low", now);
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.review.as_ref().map(|r| r.kind), Some(ReviewKind::AmountAnomaly));

        tx.complete(now);
        assert!(tx.review.is_none());
        assert_eq!(tx.paid_at, Some(now));
    }

    #[test]
    fn review_kind_storage_roundtrip() {
        for kind in [
            ReviewKind::AmountAnomaly,
            ReviewKind::CurrencyMismatch,
            ReviewKind::UnknownUser,
            ReviewKind::UnknownPlan,
        ] {
            assert_eq!(kind.as_str().parse::<ReviewKind>().unwrap(), kind);
        }
    }
}
