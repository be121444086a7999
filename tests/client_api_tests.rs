//! Tests for the client HTTP endpoints: verify, trial and consume.

#![cfg(feature = "server")]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde_json::{json, Value};
use tower::ServiceExt;

use spectre::admin::AdminOps;
use spectre::clock::ManualClock;
use spectre::config::{Secret, SpectreConfig};
use spectre::engine::{IssueRequest, LicenseEngine};
use spectre::server::{build_router, AppState};
use spectre::store::Database;
use spectre::tiers::Tier;

const MASTER_KEY: &str = "client-test-master";

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 5, 1)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap()
}

fn setup() -> (Router, LicenseEngine, Arc<ManualClock>) {
    let mut config = SpectreConfig::default();
    config.license.master_key = Some(Secret::new(MASTER_KEY));

    let clock = Arc::new(ManualClock::new(start()));
    let engine = LicenseEngine::new(Arc::new(Database::memory()), &config)
        .unwrap()
        .with_clock(clock.clone());
    let admin = AdminOps::new(engine.clone(), Some(&Secret::new("s3cret")));

    let app = build_router(AppState::new(engine.clone(), admin));
    (app, engine, clock)
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap_or(json!({}));

    (status, json)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(json!({})))
}

async fn issue(engine: &LicenseEngine, credits: i64) -> String {
    engine
        .issue(IssueRequest::new(Tier::Premium, credits, "alice"))
        .await
        .unwrap()
        .key
}

// ============================================================================
// Service endpoints
// ============================================================================

#[tokio::test]
async fn index_reports_running() {
    let (app, _, _) = setup();
    let (status, body) = get(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Spectre License API running.");
}

#[tokio::test]
async fn health_reports_store() {
    let (app, _, _) = setup();
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"]["connected"], true);
    assert_eq!(body["store"]["kind"], "memory");
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let (app, _, _) = setup();
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}

// ============================================================================
// Verify
// ============================================================================

#[tokio::test]
async fn verify_binds_on_first_use() {
    let (app, engine, _) = setup();
    let key = issue(&engine, 20).await;

    let (status, body) = post_json(
        &app,
        "/api/v1/verify",
        json!({ "key": key, "hwid": "machine-a" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["tier"], "premium");
    assert_eq!(body["credits"], 20);
    assert_eq!(body["bound"], true);
    assert!(body.get("reason").is_none());

    let (status, body) = post_json(
        &app,
        "/api/v1/verify",
        json!({ "key": key, "hwid": "machine-a" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bound"], false);
}

#[tokio::test]
async fn verify_denials_are_forbidden_with_reason() {
    let (app, engine, _) = setup();
    let key = issue(&engine, 1).await;
    post_json(&app, "/api/v1/verify", json!({ "key": key, "hwid": "machine-a" })).await;

    let (status, body) = post_json(
        &app,
        "/api/v1/verify",
        json!({ "key": key, "hwid": "machine-b" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({ "valid": false, "reason": "hwid_mismatch" }));

    let (status, body) =
        post_json(&app, "/api/v1/verify", json!({ "key": "SPK-UNKNOWN" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["reason"], "not_found");
}

#[tokio::test]
async fn verify_reports_expired_and_revoked() {
    let (app, engine, clock) = setup();
    let expiring = engine
        .issue(IssueRequest::new(Tier::Lite, 1, "bob").with_expiry(start() + Duration::days(1)))
        .await
        .unwrap()
        .key;
    let revoked = issue(&engine, 1).await;
    engine.revoke(&revoked).await.unwrap();

    clock.advance(Duration::days(2));

    let (status, body) = post_json(&app, "/api/v1/verify", json!({ "key": expiring })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["reason"], "expired");

    let (status, body) = post_json(&app, "/api/v1/verify", json!({ "key": revoked })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["reason"], "inactive");
}

#[tokio::test]
async fn verify_master_key() {
    let (app, _, _) = setup();
    let (status, body) = post_json(
        &app,
        "/api/v1/verify",
        json!({ "key": MASTER_KEY, "hwid": "anything" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tier"], "master");
    assert_eq!(body["credits"], 999_999);
}

#[tokio::test]
async fn verify_malformed_key_is_bad_request() {
    let (app, _, _) = setup();
    let (status, body) = post_json(&app, "/api/v1/verify", json!({ "key": "not a key!" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_FIELD");
    assert_eq!(body["error"]["details"]["field"], "key");
}

// ============================================================================
// Trial
// ============================================================================

#[tokio::test]
async fn trial_is_issued_once() {
    let (app, engine, _) = setup();

    let (status, body) = post_json(
        &app,
        "/api/v1/trial",
        json!({ "machine_id": "machine-1", "issued_to": "alice" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["tier"], "trial");
    assert_eq!(body["credits"], 100);
    assert_eq!(body["expires_at"], "2025-05-08T10:00:00");

    let key = body["key"].as_str().unwrap().to_string();
    let license = engine.stats(&key).await.unwrap().license;
    assert_eq!(license.hwid.as_deref(), Some("machine-1"));

    let (status, body) = post_json(
        &app,
        "/api/v1/trial",
        json!({ "machine_id": "machine-1", "issued_to": "someone-else" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "TRIAL_ALREADY_ISSUED");
}

#[tokio::test]
async fn trial_requires_both_identities() {
    let (app, _, _) = setup();
    let (status, body) = post_json(
        &app,
        "/api/v1/trial",
        json!({ "machine_id": "   ", "issued_to": "alice" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["details"]["field"], "machine_id");
}

// ============================================================================
// Consume
// ============================================================================

#[tokio::test]
async fn consume_decrements_balance() {
    let (app, engine, _) = setup();
    let key = issue(&engine, 10).await;

    let (status, body) =
        post_json(&app, "/api/v1/consume", json!({ "key": key, "amount": 4 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["consumed"], 4);
    assert_eq!(body["remaining"], 6);
}

#[tokio::test]
async fn consume_overdraw_reports_balance() {
    let (app, engine, _) = setup();
    let key = issue(&engine, 3).await;

    let (status, body) =
        post_json(&app, "/api/v1/consume", json!({ "key": key, "amount": 5 })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "INSUFFICIENT_CREDITS");
    assert_eq!(body["error"]["details"]["requested"], 5);
    assert_eq!(body["error"]["details"]["available"], 3);

    assert_eq!(engine.stats(&key).await.unwrap().license.credits, 3);
}

#[tokio::test]
async fn consume_unknown_key_is_not_found() {
    let (app, _, _) = setup();
    let (status, body) = post_json(
        &app,
        "/api/v1/consume",
        json!({ "key": "SPK-UNKNOWN", "amount": 1 }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "LICENSE_NOT_FOUND");
}

#[tokio::test]
async fn consume_zero_is_bad_request() {
    let (app, engine, _) = setup();
    let key = issue(&engine, 3).await;
    let (status, _) = post_json(&app, "/api/v1/consume", json!({ "key": key, "amount": 0 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Malformed requests
// ============================================================================

async fn post_raw(app: &Router, uri: &str, content_type: Option<&str>, body: &str) -> (StatusCode, Value) {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(content_type) = content_type {
        builder = builder.header("Content-Type", content_type);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(json!({})))
}

#[tokio::test]
async fn wrongly_typed_field_uses_standard_error_body() {
    let (app, engine, _) = setup();
    let key = issue(&engine, 10).await;

    let (status, body) = post_json(
        &app,
        "/api/v1/consume",
        json!({ "key": key, "amount": "ten" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");
    assert!(body["error"]["message"].as_str().unwrap().contains("amount"));

    assert_eq!(engine.stats(&key).await.unwrap().license.credits, 10);
}

#[tokio::test]
async fn missing_field_uses_standard_error_body() {
    let (app, _, _) = setup();
    let (status, body) =
        post_json(&app, "/api/v1/trial", json!({ "machine_id": "machine-1" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn unparsable_body_uses_standard_error_body() {
    let (app, _, _) = setup();

    let (status, body) =
        post_raw(&app, "/api/v1/verify", Some("application/json"), "{\"key\": ").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");

    let (status, body) = post_raw(&app, "/api/v1/verify", None, "{\"key\": \"SPK-A\"}").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");
}
