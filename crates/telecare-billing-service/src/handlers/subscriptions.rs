//! Subscription status for session scheduling.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use telecare_billing_core::{PlanId, SessionCredits, Subscription};
use telecare_billing_store::SubscriptionStatus;

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::handlers::payments::parse_user_id;
use crate::state::AppState;

/// A valid subscription as seen by the app backend.
#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    /// Row id.
    pub id: String,
    /// Owning user.
    pub user_id: i64,
    /// Current plan, `null` once it was removed from the catalog.
    pub plan_id: Option<i64>,
    /// Plan name at the last funding payment.
    pub plan_name: String,
    /// Plan price at the last funding payment.
    pub plan_price: Decimal,
    /// Plan currency.
    pub plan_currency: String,
    /// Start of the current window.
    pub start_date: DateTime<Utc>,
    /// End of the current window.
    pub end_date: DateTime<Utc>,
    /// Remaining session credits.
    pub credits: SessionCredits,
    /// Lifetime session credits.
    pub total_credits: SessionCredits,
    /// Reference of the last funding payment.
    pub funding_reference: Option<String>,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(sub: Subscription) -> Self {
        Self {
            id: sub.id.to_string(),
            user_id: sub.user_id.get(),
            plan_id: sub.plan_id.map(PlanId::get),
            plan_name: sub.plan_name,
            plan_price: sub.plan_price,
            plan_currency: sub.plan_currency.to_string(),
            start_date: sub.start_date,
            end_date: sub.end_date,
            credits: sub.credits,
            total_credits: sub.total_credits,
            funding_reference: sub.funding_reference,
        }
    }
}

/// `GET /v1/subscriptions/:user_id/current`
///
/// 404 unless the user has an active, unexpired subscription.
pub async fn current_subscription(
    State(state): State<Arc<AppState>>,
    _service: ServiceAuth,
    Path(user_id): Path<i64>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let user_id = parse_user_id(user_id)?;

    let subscription = state
        .store
        .current_subscription(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no active subscription for user {user_id}")))?;

    Ok(Json(subscription.into()))
}
