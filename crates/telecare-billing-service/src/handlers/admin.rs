//! Admin endpoints: user directory and the review queue.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use telecare_billing_store::Store;

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::handlers::payments::{parse_user_id, TransactionResponse};
use crate::handlers::plans::AdminActionResponse;
use crate::state::AppState;

/// Default size of the review queue page.
const DEFAULT_FLAGGED_LIMIT: usize = 50;

/// Largest review queue page.
const MAX_FLAGGED_LIMIT: usize = 500;

/// Query parameters for the review queue.
#[derive(Debug, Deserialize)]
pub struct FlaggedQuery {
    /// Page size (default 50, max 500).
    pub limit: Option<usize>,
}

/// Review queue.
#[derive(Debug, Serialize)]
pub struct FlaggedResponse {
    /// Flagged rows, most recently flagged first.
    pub transactions: Vec<TransactionResponse>,
}

/// `PUT /v1/admin/users/:user_id`
///
/// Makes a platform user known to the directory. Idempotent.
pub async fn register_user(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(user_id): Path<i64>,
) -> Result<Json<AdminActionResponse>, ApiError> {
    let user_id = parse_user_id(user_id)?;

    state.store.register_user(user_id).await?;

    tracing::info!(admin_id = %admin.admin_id, user_id = %user_id, "User registered");

    Ok(Json(AdminActionResponse {
        success: true,
        id: user_id.get(),
    }))
}

/// `GET /v1/admin/transactions/flagged`
pub async fn list_flagged(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Query(query): Query<FlaggedQuery>,
) -> Result<Json<FlaggedResponse>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_FLAGGED_LIMIT)
        .clamp(1, MAX_FLAGGED_LIMIT);

    let transactions = state.store.list_flagged_transactions(limit).await?;

    Ok(Json(FlaggedResponse {
        transactions: transactions.into_iter().map(Into::into).collect(),
    }))
}
