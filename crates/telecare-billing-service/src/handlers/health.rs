//! Liveness.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `ok` when the process answers.
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// Whether a gateway signing key is loaded. Without one every real webhook gets a 401.
    pub signed_ingress: bool,
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "telecare-billing",
        version: env!("CARGO_PKG_VERSION"),
        signed_ingress: state.config.gateway_signing_key.is_some(),
    })
}
