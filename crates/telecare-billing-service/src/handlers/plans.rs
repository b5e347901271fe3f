//! Plan catalog.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use telecare_billing_core::{checked_amount, Currency, Plan, PlanId, SessionCredits};
use telecare_billing_store::{PlanCatalog, Store};

use crate::auth::{AdminAuth, ServiceAuth};
use crate::error::ApiError;
use crate::state::AppState;

/// Request body for creating or replacing a plan.
#[derive(Debug, Deserialize)]
pub struct PlanInput {
    /// Display name.
    pub name: String,
    /// Catalog price.
    pub price: Decimal,
    /// ISO currency code.
    pub currency: String,
    /// Validity per purchase, in days.
    pub duration_days: u32,
    /// Session credits per purchase.
    #[serde(default)]
    pub credits: SessionCredits,
}

impl PlanInput {
    fn into_plan(self, id: PlanId) -> Result<Plan, ApiError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ApiError::BadRequest("name must not be empty".into()));
        }
        if self.price <= Decimal::ZERO {
            return Err(ApiError::BadRequest("price must be positive".into()));
        }
        let price =
            checked_amount(self.price).map_err(|e| ApiError::BadRequest(e.to_string()))?;
        if self.duration_days == 0 {
            return Err(ApiError::BadRequest("duration_days must be positive".into()));
        }
        let currency =
            Currency::new(&self.currency).map_err(|e| ApiError::BadRequest(e.to_string()))?;

        Ok(Plan {
            id,
            name,
            price,
            currency,
            duration_days: self.duration_days,
            credits: self.credits,
        })
    }
}

/// Plan listing.
#[derive(Debug, Serialize)]
pub struct PlanListResponse {
    /// Plans ordered by id.
    pub plans: Vec<Plan>,
}

/// Acknowledgement for admin mutations.
#[derive(Debug, Serialize)]
pub struct AdminActionResponse {
    /// Always `true`.
    pub success: bool,
    /// Affected id.
    pub id: i64,
}

/// `GET /v1/plans`
pub async fn list_plans(
    State(state): State<Arc<AppState>>,
    _service: ServiceAuth,
) -> Result<Json<PlanListResponse>, ApiError> {
    let plans = state.store.list_plans().await?;
    Ok(Json(PlanListResponse { plans }))
}

/// `PUT /v1/admin/plans/:plan_id`
pub async fn put_plan(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(plan_id): Path<i64>,
    Json(input): Json<PlanInput>,
) -> Result<Json<Plan>, ApiError> {
    let plan_id = PlanId::new(plan_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let plan = input.into_plan(plan_id)?;

    state.store.put_plan(&plan).await?;

    tracing::info!(
        admin_id = %admin.admin_id,
        plan_id = %plan.id,
        price = %plan.price,
        currency = %plan.currency,
        "Plan saved"
    );

    Ok(Json(plan))
}

/// `DELETE /v1/admin/plans/:plan_id`
///
/// Subscriptions and ledger rows keep existing with their plan reference cleared.
pub async fn delete_plan(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(plan_id): Path<i64>,
) -> Result<Json<AdminActionResponse>, ApiError> {
    let plan_id = PlanId::new(plan_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    state.store.delete_plan(plan_id).await?;

    tracing::info!(admin_id = %admin.admin_id, plan_id = %plan_id, "Plan deleted");

    Ok(Json(AdminActionResponse {
        success: true,
        id: plan_id.get(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(price: &str) -> PlanInput {
        PlanInput {
            name: " Monthly ".into(),
            price: price.parse().unwrap(),
            currency: "mwk".into(),
            duration_days: 30,
            credits: SessionCredits::new(4, 2, 1),
        }
    }

    #[test]
    fn plan_input_is_normalized() {
        let plan = input("100.00").into_plan(PlanId::new(5).unwrap()).unwrap();
        assert_eq!(plan.name, "Monthly");
        assert_eq!(plan.currency.as_str(), "MWK");
        assert_eq!(plan.price.to_string(), "100");
    }

    #[test]
    fn non_positive_price_is_rejected() {
        assert!(input("0").into_plan(PlanId::new(5).unwrap()).is_err());
    }

    #[test]
    fn price_must_fit_ledger_precision() {
        assert!(input("99.999").into_plan(PlanId::new(5).unwrap()).is_err());
        assert!(input("1000000000000").into_plan(PlanId::new(5).unwrap()).is_err());
        assert!(input("99.990").into_plan(PlanId::new(5).unwrap()).is_ok());
    }
}
