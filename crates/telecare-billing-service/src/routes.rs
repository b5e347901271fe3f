//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, health, payments, plans, subscriptions, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for `/v1` endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Liveness
///
/// ## Service API key
/// - `POST /v1/payments/initiate` - Open a checkout
/// - `GET /v1/payments` - A user's payments (`?user_id=`)
/// - `GET /v1/payments/:reference` - Ledger lookup
/// - `GET /v1/subscriptions/:user_id/current` - Valid subscription
/// - `GET /v1/plans` - Catalog
///
/// ## Admin API key
/// - `PUT /v1/admin/plans/:plan_id` - Create or replace a plan
/// - `DELETE /v1/admin/plans/:plan_id` - Remove a plan
/// - `PUT /v1/admin/users/:user_id` - Register a user
/// - `GET /v1/admin/transactions/flagged` - Review queue
///
/// ## Webhooks
/// - `POST /webhooks/payments` - Gateway notifications (body signature)
/// - `POST /webhooks/payments/test` - Unsigned notifications (admin key, when enabled)
pub fn create_router(state: AppState) -> Router {
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let api_routes = Router::new()
        // Payments
        .route("/payments", get(payments::list_payments))
        .route("/payments/initiate", post(payments::initiate_payment))
        .route("/payments/:reference", get(payments::get_payment))
        // Subscriptions
        .route(
            "/subscriptions/:user_id/current",
            get(subscriptions::current_subscription),
        )
        // Catalog
        .route("/plans", get(plans::list_plans))
        // Admin
        .route(
            "/admin/plans/:plan_id",
            put(plans::put_plan).delete(plans::delete_plan),
        )
        .route("/admin/users/:user_id", put(admin::register_user))
        .route("/admin/transactions/flagged", get(admin::list_flagged))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        // Webhooks enforce their own slots and timeout so that running out of time answers
        // 503; the gateway retries on 5xx only.
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        .route("/webhooks/payments/test", post(webhooks::test_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(origins)
    }
}
