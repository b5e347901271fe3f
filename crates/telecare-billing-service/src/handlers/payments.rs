//! Checkout initiation and ledger lookups.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use telecare_billing_core::{GatewayReference, PaymentTransaction, PlanId, ReviewFlag, UserId};
use telecare_billing_store::Store;

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Default page size for transaction listings.
const DEFAULT_PAGE_SIZE: usize = 20;

/// Largest page size accepted.
const MAX_PAGE_SIZE: usize = 100;

/// Request to open a checkout.
#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    /// Paying user.
    pub user_id: i64,
    /// Plan being bought.
    pub plan_id: i64,
}

/// A ledger row as exposed to the app backend.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// Internal id.
    pub id: String,
    /// Gateway reference; pass it to the gateway checkout as `tx_ref`.
    pub reference: String,
    /// Gateway charge id, once known.
    pub gateway_transaction_id: Option<String>,
    /// Amount.
    pub amount: Decimal,
    /// Currency.
    pub currency: String,
    /// `pending`, `completed` or `failed`.
    pub status: String,
    /// Paying user.
    pub user_id: Option<i64>,
    /// Purchased plan.
    pub plan_id: Option<i64>,
    /// Payment method descriptor.
    pub payment_method: Option<String>,
    /// Payment channel descriptor.
    pub payment_channel: Option<String>,
    /// Review marker, if the row is held for review.
    pub review: Option<ReviewFlag>,
    /// Notifications received for this reference.
    pub delivery_count: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Gateway payment time.
    pub paid_at: Option<DateTime<Utc>>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

impl From<PaymentTransaction> for TransactionResponse {
    fn from(tx: PaymentTransaction) -> Self {
        Self {
            id: tx.id.to_string(),
            reference: tx.gateway_reference.to_string(),
            gateway_transaction_id: tx.gateway_transaction_id,
            amount: tx.amount,
            currency: tx.currency.to_string(),
            status: tx.status.as_str().to_string(),
            user_id: tx.user_id.map(UserId::get),
            plan_id: tx.plan_id.map(PlanId::get),
            payment_method: tx.payment_method,
            payment_channel: tx.payment_channel,
            review: tx.review,
            delivery_count: tx.delivery_count,
            created_at: tx.created_at,
            paid_at: tx.paid_at,
            updated_at: tx.updated_at,
        }
    }
}

/// Query parameters for listing a user's payments.
#[derive(Debug, Deserialize)]
pub struct ListPaymentsQuery {
    /// Paying user.
    pub user_id: i64,
    /// Page size (default 20, max 100).
    pub limit: Option<usize>,
    /// Rows to skip.
    pub offset: Option<usize>,
}

/// Paged transaction listing.
#[derive(Debug, Serialize)]
pub struct TransactionListResponse {
    /// Rows, newest first.
    pub transactions: Vec<TransactionResponse>,
    /// Whether more rows may follow.
    pub has_more: bool,
}

/// `POST /v1/payments/initiate`
pub async fn initiate_payment(
    State(state): State<Arc<AppState>>,
    service: ServiceAuth,
    Json(req): Json<InitiatePaymentRequest>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let user_id = parse_user_id(req.user_id)?;
    let plan_id = PlanId::new(req.plan_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        service = %service.service_name,
        user_id = %user_id,
        plan_id = %plan_id,
        "Checkout requested"
    );

    let placeholder = state.engine.initiate(user_id, plan_id).await?;
    Ok(Json(placeholder.into()))
}

/// `GET /v1/payments/:reference`
pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    _service: ServiceAuth,
    Path(reference): Path<String>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let reference =
        GatewayReference::new(&reference).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let transaction = state
        .store
        .get_transaction(&reference)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("transaction not found: {reference}")))?;

    Ok(Json(transaction.into()))
}

/// `GET /v1/payments?user_id=`
pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    _service: ServiceAuth,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<TransactionListResponse>, ApiError> {
    let user_id = parse_user_id(query.user_id)?;
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    // One extra row tells us whether another page exists.
    let mut rows = state
        .store
        .list_transactions_by_user(user_id, limit + 1, offset)
        .await?;
    let has_more = rows.len() > limit;
    rows.truncate(limit);

    Ok(Json(TransactionListResponse {
        transactions: rows.into_iter().map(Into::into).collect(),
        has_more,
    }))
}

pub(crate) fn parse_user_id(raw: i64) -> Result<UserId, ApiError> {
    UserId::new(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}
