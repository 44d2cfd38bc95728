//! Risk API End-to-End Tests
//!
//! Drives the HTTP surface through the full middleware stack: auth, per-user
//! rate limiting, validation and the risk engine behind it.

mod common;

use axum::http::StatusCode;
use common::{spawn_app, alice, ALICE_KEY, BOB_KEY};
use serde_json::json;
use tradeguard::domain::repositories::broker_client::AccountSnapshot;

#[tokio::test]
async fn test_health_is_public() {
    let t = spawn_app(100);
    let (status, body) = t.call("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
    assert_eq!(body["activeLoops"], 0);
}

#[tokio::test]
async fn test_requests_without_valid_key_are_rejected() {
    let t = spawn_app(100);
    let (status, _) = t.call("GET", "/risk/metrics", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = t.call("GET", "/risk/limits", Some("not-a-real-key"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_limits_default_then_partial_update() {
    let t = spawn_app(100);
    let (status, limits) = t.call("GET", "/risk/limits", Some(ALICE_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(limits["userId"], "alice");
    assert_eq!(limits["dailyLossLimit"]["value"], 5.0);
    assert_eq!(limits["portfolioDrawdownLimit"]["value"], 15.0);

    let update = json!({ "dailyLossLimit": { "value": 2.5 }, "haltTradingOnDrawdown": false });
    let (status, updated) = t.call("PUT", "/risk/limits", Some(ALICE_KEY), Some(update)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["dailyLossLimit"]["value"], 2.5);
    assert_eq!(updated["dailyLossLimit"]["enabled"], true);
    assert_eq!(updated["haltTradingOnDrawdown"], false);
    assert_eq!(updated["portfolioDrawdownLimit"]["value"], 15.0);

    // another user's limits are untouched
    let (_, other) = t.call("GET", "/risk/limits", Some(BOB_KEY), None).await;
    assert_eq!(other["dailyLossLimit"]["value"], 5.0);
}

#[tokio::test]
async fn test_invalid_limits_are_rejected_without_writing() {
    let t = spawn_app(100);

    let (status, body) = t
        .call("PUT", "/risk/limits", Some(ALICE_KEY), Some(json!({ "dailyLossLimit": { "value": -1.0 } })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("dailyLossLimit"));

    let (status, _) = t
        .call("PUT", "/risk/limits", Some(ALICE_KEY), Some(json!({ "somethingElse": 1 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t
        .call("PUT", "/risk/limits", Some(ALICE_KEY), Some(json!({ "dailyLossLimit": "high" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, limits) = t.call("GET", "/risk/limits", Some(ALICE_KEY), None).await;
    assert_eq!(limits["dailyLossLimit"]["value"], 5.0);
}

#[tokio::test]
async fn test_metrics_are_calculated_on_first_read() {
    let t = spawn_app(100);
    let (status, metrics) = t.call("GET", "/risk/metrics", Some(ALICE_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["portfolioValue"], 100_000.0);
    assert_eq!(metrics["currentDrawdown"], 0.0);
    assert_eq!(t.store.metrics_count(&alice()).await, 1);

    let (status, _) = t.call("POST", "/risk/metrics/calculate", Some(ALICE_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(t.store.metrics_count(&alice()).await, 2);
}

#[tokio::test]
async fn test_breach_check_reports_daily_loss() {
    let t = spawn_app(100);
    t.broker
        .set_account(
            &alice(),
            AccountSnapshot {
                equity: 90_000.0,
                cash: 90_000.0,
                buying_power: 90_000.0,
                last_equity: 100_000.0,
            },
        )
        .await;

    let (status, report) = t.call("GET", "/risk/check-breaches", Some(ALICE_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = report["breaches"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|b| b["limit"].as_str())
        .collect();
    assert!(names.contains(&"dailyLossLimit"));
    assert_eq!(report["shouldHaltTrading"], true);
}

#[tokio::test]
async fn test_emergency_stop_requires_exact_confirmation() {
    let t = spawn_app(100);
    t.broker.seed_position(&alice(), "MSFT", 10.0, 400.0).await;

    for body in [json!({}), json!({ "confirmation": "confirm" }), json!({ "confirmation": "YES" })] {
        let (status, _) = t.call("POST", "/risk/emergency-stop", Some(ALICE_KEY), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    // nothing was touched
    assert!(t.broker.submitted_orders(&alice()).await.is_empty());

    let (status, report) = t
        .call("POST", "/risk/emergency-stop", Some(ALICE_KEY), Some(json!({ "confirmation": "CONFIRM" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["closedPositions"], 1);
    assert_eq!(report["totalPositions"], 1);
    assert_eq!(report["autoTradingEnabled"], false);

    let (_, status_body) = t.call("GET", "/strategy/auto-trading/status", Some(ALICE_KEY), None).await;
    assert_eq!(status_body["tradingStatus"], "stopped");
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_emergency_stop_without_json_body_is_unconfirmed() {
    let t = spawn_app(100);
    t.broker.seed_position(&alice(), "MSFT", 10.0, 400.0).await;

    let (status, body) = t.call("POST", "/risk/emergency-stop", Some(ALICE_KEY), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    for (content_type, raw) in [("text/plain", "CONFIRM"), ("application/json", "{\"confirmation\":")] {
        let (status, _) = t
            .call_raw("POST", "/risk/emergency-stop", ALICE_KEY, Some(content_type), raw)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {:?}", raw);
    }
    assert!(t.broker.submitted_orders(&alice()).await.is_empty());

    // a well-formed confirmation needs no content type
    let (status, report) = t
        .call_raw("POST", "/risk/emergency-stop", ALICE_KEY, None, "{\"confirmation\":\"CONFIRM\"}")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["closedPositions"], 1);
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_rate_limit_is_per_user() {
    let t = spawn_app(2);
    for _ in 0..2 {
        let (status, _) = t.call("GET", "/risk/limits", Some(ALICE_KEY), None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, _) = t.call("GET", "/risk/limits", Some(ALICE_KEY), None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, _) = t.call("GET", "/risk/limits", Some(BOB_KEY), None).await;
    assert_eq!(status, StatusCode::OK);

    // unauthenticated requests never reach the limiter
    let (status, _) = t.call("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}
