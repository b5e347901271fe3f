//! Common test utilities for telecare billing integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use telecare_billing_core::{Currency, Plan, PlanId, SessionCredits, UserId};
use telecare_billing_service::crypto::hmac_sha256_hex;
use telecare_billing_service::{create_router, AppState, ServiceConfig};
use telecare_billing_store::{MemoryStore, Store};

/// Seeded user.
pub const USER_ID: i64 = 11;

/// Seeded plan: 100 MWK, 30 days, 4/2/1 credits.
pub const PLAN_ID: i64 = 5;

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the server, for assertions and fault injection.
    pub store: MemoryStore,
    /// The service API key for service-to-service requests.
    pub service_api_key: String,
    /// The admin API key.
    pub admin_api_key: String,
    /// The gateway signing key.
    pub signing_key: String,
}

impl TestHarness {
    /// Create a harness with the test webhook disabled.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a harness after adjusting the default test configuration.
    pub async fn with_config(adjust: impl FnOnce(&mut ServiceConfig)) -> Self {
        let store = MemoryStore::new();
        store
            .register_user(UserId::new(USER_ID).unwrap())
            .await
            .expect("Failed to seed user");
        store.put_plan(&monthly_plan()).await.expect("Failed to seed plan");

        let service_api_key = "test-service-key".to_string();
        let admin_api_key = "test-admin-key".to_string();
        let signing_key = "test-signing-key".to_string();

        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            service_api_key: Some(service_api_key.clone()),
            admin_api_key: Some(admin_api_key.clone()),
            gateway_signing_key: Some(signing_key.clone()),
            ..ServiceConfig::default()
        };
        adjust(&mut config);

        let state = AppState::new(Arc::new(store.clone()), config).expect("Failed to build state");
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            service_api_key,
            admin_api_key,
            signing_key,
        }
    }

    /// Hex signature of `body` with the harness signing key.
    pub fn sign(&self, body: &[u8]) -> String {
        hmac_sha256_hex(self.signing_key.as_bytes(), body).expect("HMAC accepts any key")
    }

    /// POST a signed notification to `/webhooks/payments`.
    pub async fn deliver(&self, notification: &Value) -> axum_test::TestResponse {
        let body = serde_json::to_vec(notification).unwrap();
        let signature = self.sign(&body);
        self.server
            .post("/webhooks/payments")
            .add_header("signature", signature)
            .content_type("application/json")
            .bytes(body.into())
            .await
    }
}

/// The seeded plan.
pub fn monthly_plan() -> Plan {
    Plan {
        id: PlanId::new(PLAN_ID).unwrap(),
        name: "Monthly".into(),
        price: Decimal::from(100),
        currency: Currency::new("MWK").unwrap(),
        duration_days: 30,
        credits: SessionCredits::new(4, 2, 1),
    }
}

/// A gateway notification for the seeded user and plan.
pub fn notification(reference: &str, amount: &str, status: &str) -> Value {
    json!({
        "event_type": "api.charge.payment",
        "tx_ref": reference,
        "charge_id": format!("ch_{reference}"),
        "amount": amount,
        "currency": "MWK",
        "status": status,
        "authorization": {"channel": "Mobile Money"},
        "meta": json!({"user_id": USER_ID, "plan_id": PLAN_ID}).to_string(),
    })
}
