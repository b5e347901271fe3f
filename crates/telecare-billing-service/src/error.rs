//! Engine and API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use telecare_billing_core::{NotificationError, PlanId, UserId};
use telecare_billing_store::StoreError;

/// Errors from the reconciliation engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The notification failed boundary validation. Nothing was ledgered.
    #[error("malformed notification: {0}")]
    Malformed(#[from] NotificationError),

    /// No signature header was sent.
    #[error("missing signature")]
    MissingSignature,

    /// The signature does not match the body.
    #[error("invalid signature")]
    InvalidSignature,

    /// Signed ingress is refused because no signing key is configured.
    #[error("gateway signing key is not configured")]
    SigningKeyNotConfigured,

    /// The payment names no user, or one the directory doesn't know.
    #[error("unknown user: {}", .0.map_or_else(|| "none".to_string(), |u| u.to_string()))]
    UnknownUser(Option<UserId>),

    /// No plan could be resolved for a completed payment.
    #[error("no plan could be resolved for reference {0}")]
    UnknownPlan(String),

    /// A checkout was requested for a plan that isn't in the catalog.
    #[error("plan not found: {0}")]
    PlanNotFound(PlanId),

    /// Storage failed. The unit of work was rolled back.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Whether the gateway should redeliver.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - resource already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request was understood but cannot be acted on.
    #[error("unprocessable: {0}")]
    Unprocessable(String),

    /// Internal server error. The caller may retry.
    #[error("internal error: {0}")]
    Internal(String),

    /// No decision was reached in time. Nothing was committed; the caller may retry.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::Unprocessable(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "unprocessable",
                msg.clone(),
                None,
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    Some(serde_json::json!({ "retryable": true })),
                )
            }
            Self::Unavailable(msg) => {
                tracing::warn!(reason = %msg, "Request not completed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    msg.clone(),
                    Some(serde_json::json!({ "retryable": true })),
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => {
                Self::NotFound(format!("{entity} not found: {id}"))
            }
            StoreError::Conflict(msg) | StoreError::Database(msg) | StoreError::Serialization(msg) => {
                Self::Internal(msg)
            }
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Malformed(e) => Self::BadRequest(e.to_string()),
            EngineError::MissingSignature | EngineError::InvalidSignature => Self::Unauthorized,
            EngineError::SigningKeyNotConfigured => {
                tracing::error!("Rejecting signed webhook: gateway signing key is not configured");
                Self::Unauthorized
            }
            e @ EngineError::UnknownUser(_) => Self::NotFound(e.to_string()),
            e @ EngineError::PlanNotFound(_) => Self::NotFound(e.to_string()),
            e @ EngineError::UnknownPlan(_) => Self::Unprocessable(e.to_string()),
            EngineError::Store(e) => Self::from(e),
        }
    }
}
