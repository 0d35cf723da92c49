//! Tests for health check endpoints.
//!
//! Component health is process-global, so status assertions accept any
//! valid state rather than a specific one.

use axum::http::StatusCode;
use axum_test::TestServer;
use integration_tests::setup::TestContext;

/// Test /health endpoint returns proper structure
#[tokio::test]
async fn test_health_endpoint_structure() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let response = server.get("/health").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();

    for field in ["status", "queue_connected", "store_connected", "in_flight_records"] {
        assert!(body.get(field).is_some(), "Response should have '{}' field", field);
    }
    assert!(
        body["in_flight_records"].as_u64().is_some(),
        "in_flight_records should be a valid u64 number"
    );
}

/// Test /health endpoint reports a valid status
#[tokio::test]
async fn test_health_endpoint_status_value() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let body: serde_json::Value = server.get("/health").await.json();

    let status = body["status"].as_str().unwrap_or("");
    assert!(
        status == "healthy" || status == "degraded" || status == "unhealthy",
        "Status should be 'healthy', 'degraded', or 'unhealthy', got '{}'",
        status
    );
}

/// Test /health/ready reflects both components
#[tokio::test]
async fn test_ready_endpoint_when_components_healthy() {
    let ctx = TestContext::new().await;
    telemetry::health().queue.set_healthy();
    telemetry::health().store.set_healthy();

    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    let response = server.get("/health/ready").await;

    let status = response.status_code();
    assert!(
        status == StatusCode::OK || status == StatusCode::SERVICE_UNAVAILABLE,
        "Ready endpoint should return 200 or 503, got {}",
        status
    );
}

/// Test /health/live endpoint
#[tokio::test]
async fn test_live_endpoint() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let response = server.get("/health/live").await;
    response.assert_status_ok();
}

/// Test GET /records/:id for an unknown id
#[tokio::test]
async fn test_unknown_record_returns_404() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let response = server.get("/records/does-not-exist").await;

    response.assert_status(StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "REC_404");
}
