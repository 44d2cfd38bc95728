//! Trading Control Loop End-to-End Tests
//!
//! Toggle auto-trading over HTTP, drive a cycle through the user's loop and
//! read the outcome back from the signal log and the status endpoint.

mod common;

use axum::http::StatusCode;
use common::{alice, bob, buy_bars, spawn_app, ALICE_KEY, BOB_KEY};
use serde_json::json;
use tradeguard::application::actors::trading_loop::CycleOutcome;

#[tokio::test]
async fn test_strategy_config_round_trip() {
    let t = spawn_app(100);
    let (status, config) = t.call("GET", "/strategy/config", Some(ALICE_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(config["emaFastPeriod"], 12);
    assert_eq!(config["maxOpenPositions"], 10);

    let (status, updated) = t
        .call(
            "PUT",
            "/strategy/config",
            Some(ALICE_KEY),
            Some(json!({ "universe": ["AAPL"], "maxOpenPositions": 3 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["universe"], json!(["AAPL"]));
    assert_eq!(updated["maxOpenPositions"], 3);
    assert_eq!(updated["emaSlowPeriod"], 26);

    let (status, _) = t
        .call("PUT", "/strategy/config", Some(ALICE_KEY), Some(json!({ "emaFastPeriod": 1 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, unchanged) = t.call("GET", "/strategy/config", Some(ALICE_KEY), None).await;
    assert_eq!(unchanged["emaFastPeriod"], 12);
}

#[tokio::test]
async fn test_toggle_round_trip() {
    let t = spawn_app(100);
    let (status, body) = t
        .call("POST", "/strategy/auto-trading/toggle", Some(ALICE_KEY), Some(json!({ "enabled": true })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["autoTradingEnabled"], true);
    assert_eq!(body["tradingStatus"], "active");
    assert!(body["lastToggleTime"].is_string());

    let (_, status_body) = t.call("GET", "/strategy/auto-trading/status", Some(ALICE_KEY), None).await;
    assert_eq!(status_body["autoTradingEnabled"], true);
    assert_eq!(status_body["userId"], "alice");

    let (_, other) = t.call("GET", "/strategy/auto-trading/status", Some(BOB_KEY), None).await;
    assert_eq!(other["autoTradingEnabled"], false);

    let (status, _) = t
        .call("POST", "/strategy/auto-trading/toggle", Some(ALICE_KEY), Some(json!({ "enabled": "yes" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_enabled_cycle_buys_once_and_logs_signal() {
    let t = spawn_app(100);
    t.broker.set_bars("AAPL", buy_bars()).await;
    t.call("PUT", "/strategy/config", Some(ALICE_KEY), Some(json!({ "universe": ["AAPL"] })))
        .await;
    t.call("POST", "/strategy/auto-trading/toggle", Some(ALICE_KEY), Some(json!({ "enabled": true })))
        .await;

    let handle = t.engine.loop_for(&alice()).await.unwrap();
    let CycleOutcome::Completed(summary) = handle.run_cycle().await.unwrap() else {
        panic!("expected a completed cycle");
    };
    assert_eq!(summary.buys_submitted, 1);

    let (status, signals) = t.call("GET", "/strategy/signals?limit=10", Some(ALICE_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    let buys: Vec<_> = signals
        .as_array()
        .unwrap()
        .iter()
        .filter(|s| s["signalType"] == "buy")
        .collect();
    assert_eq!(buys.len(), 1);
    assert_eq!(buys[0]["executed"], true);
    assert_eq!(buys[0]["symbol"], "AAPL");

    // the next cycle sees the open position and does not buy again
    let CycleOutcome::Completed(summary) = handle.run_cycle().await.unwrap() else {
        panic!("expected a completed cycle");
    };
    assert_eq!(summary.buys_submitted, 0);
    assert_eq!(t.broker.submitted_orders(&alice()).await.len(), 1);

    // bob never traded
    let (_, bob_signals) = t.call("GET", "/strategy/signals", Some(BOB_KEY), None).await;
    assert!(bob_signals.as_array().unwrap().is_empty());
    assert!(t.broker.submitted_orders(&bob()).await.is_empty());
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_disabled_user_cycle_is_idle() {
    let t = spawn_app(100);
    t.broker.set_bars("AAPL", buy_bars()).await;
    let handle = t.engine.loop_for(&alice()).await.unwrap();
    assert_eq!(handle.run_cycle().await.unwrap(), CycleOutcome::Idle);
    assert!(t.broker.submitted_orders(&alice()).await.is_empty());
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_emergency_stop_turns_trading_off() {
    let t = spawn_app(100);
    t.call("POST", "/strategy/auto-trading/toggle", Some(ALICE_KEY), Some(json!({ "enabled": true })))
        .await;
    t.broker.seed_position(&alice(), "MSFT", 5.0, 400.0).await;

    let (status, _) = t
        .call("POST", "/risk/emergency-stop", Some(ALICE_KEY), Some(json!({ "confirmation": "CONFIRM" })))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = t.call("GET", "/strategy/auto-trading/status", Some(ALICE_KEY), None).await;
    assert_eq!(body["autoTradingEnabled"], false);
    assert_eq!(body["tradingStatus"], "stopped");

    let handle = t.engine.loop_for(&alice()).await.unwrap();
    assert_eq!(handle.run_cycle().await.unwrap(), CycleOutcome::Idle);
    t.engine.shutdown().await;
}
