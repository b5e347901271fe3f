//! Service and admin API tests.
//!
//! Run with: cargo test -p telecare-billing-service --test api

mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};

use common::{notification, TestHarness, PLAN_ID, USER_ID};

#[tokio::test]
async fn test_health() {
    let harness = TestHarness::new().await;

    let response = harness.server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "telecare-billing");
    assert_eq!(body["signed_ingress"], true);
}

#[tokio::test]
async fn test_service_routes_require_api_key() {
    let harness = TestHarness::new().await;

    harness
        .server
        .get("/v1/plans")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    harness
        .server
        .get("/v1/plans")
        .add_header("x-api-key", "wrong-key")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let response = harness
        .server
        .get("/v1/plans")
        .add_header("x-api-key", harness.service_api_key.clone())
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["plans"][0]["id"], PLAN_ID);
    assert_eq!(body["plans"][0]["credits"]["voice"], 2);
}

#[tokio::test]
async fn test_admin_routes_reject_service_key() {
    let harness = TestHarness::new().await;

    harness
        .server
        .get("/v1/admin/transactions/flagged")
        .add_header("x-admin-key", harness.service_api_key.clone())
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_initiated_checkout_is_activated_by_reference_only() {
    let harness = TestHarness::new().await;

    let response = harness
        .server
        .post("/v1/payments/initiate")
        .add_header("x-api-key", harness.service_api_key.clone())
        .add_header("x-service-name", "telecare-app")
        .json(&json!({"user_id": USER_ID, "plan_id": PLAN_ID}))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    let reference = body["reference"].as_str().unwrap().to_string();
    assert!(reference.starts_with("TXN_"));
    assert_eq!(body["status"], "pending");
    assert_eq!(body["amount"], "100");

    // The gateway echoes only the reference; meta is empty.
    let mut payload = notification(&reference, "97", "success");
    payload["meta"] = json!("");
    let response = harness.deliver(&payload).await;
    response.assert_status_ok();
    let outcome: Value = response.json();
    assert_eq!(outcome["outcome"], "activated");

    let response = harness
        .server
        .get(&format!("/v1/payments/{reference}"))
        .add_header("x-api-key", harness.service_api_key.clone())
        .await;
    response.assert_status_ok();
    let tx: Value = response.json();
    assert_eq!(tx["status"], "completed");
    assert_eq!(tx["user_id"], USER_ID);
    assert_eq!(tx["plan_id"], PLAN_ID);
    assert_eq!(tx["amount"], "97");
    assert_eq!(tx["delivery_count"], 1);
}

#[tokio::test]
async fn test_initiate_validates_user_and_plan() {
    let harness = TestHarness::new().await;

    harness
        .server
        .post("/v1/payments/initiate")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({"user_id": 999, "plan_id": PLAN_ID}))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    harness
        .server
        .post("/v1/payments/initiate")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({"user_id": USER_ID, "plan_id": 404}))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    harness
        .server
        .post("/v1/payments/initiate")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({"user_id": -1, "plan_id": PLAN_ID}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_reference_is_not_found() {
    let harness = TestHarness::new().await;

    harness
        .server
        .get("/v1/payments/NOPE")
        .add_header("x-api-key", harness.service_api_key.clone())
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_current_subscription() {
    let harness = TestHarness::new().await;
    let path = format!("/v1/subscriptions/{USER_ID}/current");

    harness
        .server
        .get(&path)
        .add_header("x-api-key", harness.service_api_key.clone())
        .await
        .assert_status(StatusCode::NOT_FOUND);

    harness
        .deliver(&notification("REF-1", "97", "success"))
        .await
        .assert_status_ok();

    let response = harness
        .server
        .get(&path)
        .add_header("x-api-key", harness.service_api_key.clone())
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["user_id"], USER_ID);
    assert_eq!(body["plan_id"], PLAN_ID);
    assert_eq!(body["credits"], json!({"text": 4, "voice": 2, "video": 1}));
    assert_eq!(body["funding_reference"], "REF-1");
}

#[tokio::test]
async fn test_user_payments_are_listed_newest_first() {
    let harness = TestHarness::new().await;
    for reference in ["REF-A", "REF-B", "REF-C"] {
        harness
            .deliver(&notification(reference, "97", "pending"))
            .await
            .assert_status_ok();
    }

    let response = harness
        .server
        .get(&format!("/v1/payments?user_id={USER_ID}&limit=2"))
        .add_header("x-api-key", harness.service_api_key.clone())
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["has_more"], true);
    assert_eq!(body["transactions"][0]["reference"], "REF-C");
    assert_eq!(body["transactions"][1]["reference"], "REF-B");
}

#[tokio::test]
async fn test_admin_manages_catalog_and_users() {
    let harness = TestHarness::new().await;

    let response = harness
        .server
        .put("/v1/admin/plans/6")
        .add_header("x-admin-key", harness.admin_api_key.clone())
        .json(&json!({
            "name": "Quarterly",
            "price": "270.00",
            "currency": "mwk",
            "duration_days": 90,
            "credits": {"text": 12, "voice": 6, "video": 3}
        }))
        .await;
    response.assert_status_ok();
    let plan: Value = response.json();
    assert_eq!(plan["currency"], "MWK");
    assert_eq!(plan["price"], "270");

    harness
        .server
        .put("/v1/admin/plans/7")
        .add_header("x-admin-key", harness.admin_api_key.clone())
        .json(&json!({"name": "Free", "price": 0, "currency": "MWK", "duration_days": 30}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    harness
        .server
        .delete("/v1/admin/plans/404")
        .add_header("x-admin-key", harness.admin_api_key.clone())
        .await
        .assert_status(StatusCode::NOT_FOUND);

    harness
        .server
        .put("/v1/admin/users/42")
        .add_header("x-admin-key", harness.admin_api_key.clone())
        .await
        .assert_status_ok();

    let mut payload = notification("REF-42", "265", "success");
    payload["meta"] = json!({"user_id": 42, "plan_id": 6});
    let response = harness.deliver(&payload).await;
    let body: Value = response.json();
    assert_eq!(body["outcome"], "activated");
}

#[tokio::test]
async fn test_review_queue_lists_flagged_rows() {
    let harness = TestHarness::new().await;
    harness
        .deliver(&notification("REF-LOW", "10", "success"))
        .await
        .assert_status_ok();
    harness
        .deliver(&notification("REF-OK", "97", "success"))
        .await
        .assert_status_ok();

    let response = harness
        .server
        .get("/v1/admin/transactions/flagged?limit=10")
        .add_header("x-admin-key", harness.admin_api_key.clone())
        .add_header("x-admin-id", "ops-1")
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let rows = body["transactions"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["reference"], "REF-LOW");
    assert_eq!(rows[0]["status"], "pending");
    assert_eq!(rows[0]["review"]["kind"], "amount_anomaly");
}
