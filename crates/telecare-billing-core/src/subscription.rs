//! Subscription state and activation arithmetic.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Currency, PaymentTransaction, Plan, PlanId, SessionCredits, SubscriptionId, UserId};

/// Whether a subscription row is switched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Granting access until `end_date`.
    Active,
    /// Switched off.
    Inactive,
}

impl SubscriptionState {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl std::str::FromStr for SubscriptionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(format!("unknown subscription state: {other}")),
        }
    }
}

/// A user's subscription. There is one row per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Row id.
    pub id: SubscriptionId,
    /// Owning user.
    pub user_id: UserId,
    /// Current plan. `None` once the plan is removed from the catalog.
    pub plan_id: Option<PlanId>,
    /// Plan name at the time of the last funding payment.
    pub plan_name: String,
    /// Plan price at the time of the last funding payment.
    pub plan_price: Decimal,
    /// Plan currency at the time of the last funding payment.
    pub plan_currency: Currency,
    /// On/off switch.
    pub status: SubscriptionState,
    /// Start of the current validity window.
    pub start_date: DateTime<Utc>,
    /// End of the current validity window.
    pub end_date: DateTime<Utc>,
    /// Remaining session credits.
    pub credits: SessionCredits,
    /// Session credits granted over the subscription's lifetime.
    pub total_credits: SessionCredits,
    /// Snapshot of the transaction that last funded this subscription.
    pub payment_metadata: serde_json::Value,
    /// Gateway reference of the last funding transaction.
    pub funding_reference: Option<String>,
    /// When the last activation happened.
    pub activated_at: DateTime<Utc>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// How an activation changed the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    /// First subscription for this user.
    Created,
    /// A valid subscription was extended.
    Extended,
    /// An expired or inactive subscription was restarted.
    Renewed,
}

impl Subscription {
    /// Whether the subscription grants access at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionState::Active && self.end_date > now
    }

    /// Start a first subscription funded by `funding`.
    #[must_use]
    pub fn start(
        user_id: UserId,
        plan: &Plan,
        funding: &PaymentTransaction,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SubscriptionId::generate(),
            user_id,
            plan_id: Some(plan.id),
            plan_name: plan.name.clone(),
            plan_price: plan.price,
            plan_currency: plan.currency.clone(),
            status: SubscriptionState::Active,
            start_date: now,
            end_date: now + window(plan),
            credits: plan.credits,
            total_credits: plan.credits,
            payment_metadata: funding.funding_metadata(),
            funding_reference: Some(funding.gateway_reference.to_string()),
            activated_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a confirmed payment for `plan` to an existing row.
    ///
    /// A valid subscription is extended from its current end date and keeps its remaining
    /// credits. An expired or inactive one gets a fresh window and fresh credits.
    pub fn apply(
        &mut self,
        plan: &Plan,
        funding: &PaymentTransaction,
        now: DateTime<Utc>,
    ) -> ActivationKind {
        let kind = if self.is_valid_at(now) {
            self.end_date += window(plan);
            self.credits = self.credits.plus(plan.credits);
            ActivationKind::Extended
        } else {
            self.status = SubscriptionState::Active;
            self.start_date = now;
            self.end_date = now + window(plan);
            self.credits = plan.credits;
            ActivationKind::Renewed
        };

        self.total_credits = self.total_credits.plus(plan.credits);
        self.plan_id = Some(plan.id);
        self.plan_name.clone_from(&plan.name);
        self.plan_price = plan.price;
        self.plan_currency = plan.currency.clone();
        self.payment_metadata = funding.funding_metadata();
        self.funding_reference = Some(funding.gateway_reference.to_string());
        self.activated_at = now;
        self.updated_at = now;
        kind
    }
}

fn window(plan: &Plan) -> Duration {
    Duration::days(i64::from(plan.duration_days))
}
