//! Gateway notification ingress.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use ulid::Ulid;

use telecare_billing_core::NotificationPayload;

use crate::auth::AdminAuth;
use crate::engine::EngineReport;
use crate::error::{ApiError, EngineError};
use crate::state::AppState;

/// Headers the gateway may carry the body signature in, in order of preference.
const SIGNATURE_HEADERS: &[&str] = &["signature", "x-signature"];

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Always `true`; failures use the error body instead.
    pub success: bool,
    /// How the notification was handled.
    #[serde(flatten)]
    pub report: EngineReport,
}

impl From<EngineReport> for WebhookResponse {
    fn from(report: EngineReport) -> Self {
        Self {
            success: true,
            report,
        }
    }
}

/// `POST /webhooks/payments`: signed gateway notifications.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok());

    let report = bounded(&state, "payments", state.engine.handle_signed(&body, signature)).await?;

    Ok(Json(report.into()))
}

/// Body of `POST /webhooks/payments/test`.
///
/// Either a complete gateway `payload`, or a few fields a notification is synthesized from.
#[derive(Debug, Default, Deserialize)]
pub struct TestWebhookRequest {
    /// Sent to the engine as-is when present.
    pub payload: Option<Value>,
    /// Default 11.
    pub user_id: Option<i64>,
    /// Omitted from `meta` when absent.
    pub plan_id: Option<i64>,
    /// Default 1000.
    pub amount: Option<Value>,
    /// Default MWK.
    pub currency: Option<String>,
    /// Default `success`.
    pub status: Option<String>,
    /// Default `api.charge.payment`.
    pub event_type: Option<String>,
    /// Default `TEST_<ulid>`.
    pub reference: Option<String>,
}

impl TestWebhookRequest {
    /// The notification this request stands for.
    #[must_use]
    pub fn into_payload(self) -> Value {
        if let Some(payload) = self.payload {
            return payload;
        }

        let id = Ulid::new();
        let mut meta = json!({ "user_id": self.user_id.unwrap_or(11) });
        if let Some(plan_id) = self.plan_id {
            meta["plan_id"] = json!(plan_id);
        }

        json!({
            "event_type": self.event_type.unwrap_or_else(|| "api.charge.payment".into()),
            "tx_ref": self.reference.unwrap_or_else(|| format!("TEST_{id}")),
            "charge_id": format!("test_{id}"),
            "amount": self.amount.unwrap_or_else(|| json!(1000)),
            "currency": self.currency.unwrap_or_else(|| "MWK".into()),
            "status": self.status.unwrap_or_else(|| "success".into()),
            "authorization": {
                "channel": "Mobile Money",
                "completed_at": Utc::now().to_rfc3339(),
            },
            "meta": meta.to_string(),
        })
    }
}

/// `POST /webhooks/payments/test`: unsigned notifications for staging.
///
/// Served only when enabled in configuration, and only to admin callers.
pub async fn test_webhook(
    State(state): State<Arc<AppState>>,
    admin: Result<AdminAuth, ApiError>,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    if !state.has_test_webhook() {
        return Err(ApiError::NotFound("test webhook is disabled".into()));
    }
    let admin = admin?;

    let request: TestWebhookRequest = if body.iter().all(u8::is_ascii_whitespace) {
        TestWebhookRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };
    let payload = NotificationPayload::from_value(request.into_payload())
        .map_err(|e| ApiError::from(EngineError::from(e)))?;

    tracing::info!(
        admin_id = %admin.admin_id,
        reference = %payload.reference,
        "Processing test webhook"
    );

    let report = bounded(&state, "payments/test", state.engine.process(payload)).await?;

    Ok(Json(report.into()))
}

/// Run `work` in a webhook slot, within the request timeout.
///
/// Running out of time drops `work`, which rolls back its unit of work, and answers 503 so the
/// gateway redelivers.
async fn bounded<F>(
    state: &AppState,
    endpoint: &'static str,
    work: F,
) -> Result<EngineReport, ApiError>
where
    F: Future<Output = Result<EngineReport, EngineError>>,
{
    let deadline = Duration::from_secs(state.config.request_timeout_seconds);
    let run = async {
        let _permit = state
            .webhook_permits
            .acquire()
            .await
            .map_err(|_| ApiError::Unavailable("webhook intake is closed".into()))?;
        work.await.map_err(|e| log_rejection(endpoint, e))
    };

    tokio::time::timeout(deadline, run).await.unwrap_or_else(|_| {
        tracing::warn!(
            endpoint,
            timeout_seconds = state.config.request_timeout_seconds,
            "Webhook timed out before a decision was committed"
        );
        Err(ApiError::Unavailable(
            "notification was not processed in time".into(),
        ))
    })
}

fn log_rejection(endpoint: &'static str, err: EngineError) -> ApiError {
    if !err.is_retryable() {
        tracing::warn!(endpoint, error = %err, "Webhook rejected");
    }
    err.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_payload_passes_validation() {
        let request = TestWebhookRequest {
            plan_id: Some(5),
            ..TestWebhookRequest::default()
        };
        let payload = NotificationPayload::from_value(request.into_payload()).unwrap();

        assert!(payload.reference.as_str().starts_with("TEST_"));
        assert_eq!(payload.user_id.map(|u| u.get()), Some(11));
        assert_eq!(payload.plan_id.map(|p| p.get()), Some(5));
        assert_eq!(payload.payment_channel.as_deref(), Some("Mobile Money"));
        assert!(payload.paid_at.is_some());
    }

    #[test]
    fn explicit_payload_is_passed_through() {
        let raw = json!({"tx_ref": "X"});
        let request = TestWebhookRequest {
            payload: Some(raw.clone()),
            user_id: Some(3),
            ..TestWebhookRequest::default()
        };
        assert_eq!(request.into_payload(), raw);
    }
}
