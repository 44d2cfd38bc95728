//! Shared wiring for the end-to-end suites: a full router over the paper
//! broker and the in-memory store, with a frozen clock.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use tradeguard::application::actors::trading_loop::{LoopContext, LoopSettings};
use tradeguard::application::handlers::router;
use tradeguard::application::services::trading_engine::TradingEngine;
use tradeguard::auth::ApiKeys;
use tradeguard::domain::entities::price_bar::PriceBar;
use tradeguard::domain::entities::user::UserId;
use tradeguard::domain::repositories::broker_client::Timeframe;
use tradeguard::domain::repositories::clock::FixedClock;
use tradeguard::domain::services::risk_engine::RiskEngine;
use tradeguard::domain::services::signal_generator::SignalGenerator;
use tradeguard::infrastructure::paper_broker::PaperBroker;
use tradeguard::persistence::memory_store::InMemoryStore;
use tradeguard::rate_limit::{create_rate_limiter, RateLimiterConfig};

pub const ALICE_KEY: &str = "alice-0123456789abcdef0123456789abcdef";
pub const BOB_KEY: &str = "bob-0123456789abcdef0123456789abcdef00";

pub struct TestApp {
    pub app: Router,
    pub engine: Arc<TradingEngine>,
    pub broker: Arc<PaperBroker>,
    pub store: Arc<InMemoryStore>,
}

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 15, 0, 0).unwrap()
}

pub fn alice() -> UserId {
    UserId::new("alice")
}

pub fn bob() -> UserId {
    UserId::new("bob")
}

/// Slow climb, a three-bar dip and a sharp bounce: produces one buy
pub fn buy_bars() -> Vec<PriceBar> {
    let mut closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.3).collect();
    for _ in 0..3 {
        closes.push(closes[closes.len() - 1] - 1.0);
    }
    for _ in 0..4 {
        closes.push(closes[closes.len() - 1] + 2.0);
    }
    let start = now() - ChronoDuration::days(closes.len() as i64);
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            PriceBar::new(start + ChronoDuration::days(i as i64), c, c + 1.0, c - 1.0, c, 2_000_000.0)
        })
        .collect()
}

pub fn spawn_app(requests_per_minute: u32) -> TestApp {
    let broker = Arc::new(PaperBroker::new(100_000.0));
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(FixedClock::new(now()));

    let ctx = LoopContext {
        broker: broker.clone(),
        store: store.clone(),
        clock: clock.clone(),
        signals: Arc::new(SignalGenerator::new(
            broker.clone(),
            store.clone(),
            clock.clone(),
            Timeframe::Day,
            100,
        )),
        risk: Arc::new(RiskEngine::new(broker.clone(), store.clone(), clock, Timeframe::Day, 30)),
    };
    let engine = Arc::new(TradingEngine::new(
        ctx,
        LoopSettings {
            interval: Duration::from_secs(3600),
            max_backoff: Duration::from_secs(7200),
        },
    ));

    let keys = ApiKeys::parse(&format!("alice:{},bob:{}", ALICE_KEY, BOB_KEY)).unwrap();
    let limiter = create_rate_limiter(RateLimiterConfig { requests_per_minute });
    let app = router(engine.clone(), Arc::new(keys), limiter);

    TestApp {
        app,
        engine,
        broker,
        store,
    }
}

impl TestApp {
    pub async fn call(&self, method: &str, uri: &str, key: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }
        let request = match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    /// Send `body` verbatim with an optional content type
    #[allow(dead_code)]
    pub async fn call_raw(
        &self,
        method: &str,
        uri: &str,
        key: &str,
        content_type: Option<&str>,
        body: &'static str,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Authorization", format!("Bearer {}", key));
        if let Some(content_type) = content_type {
            builder = builder.header("Content-Type", content_type);
        }
        self.send(builder.body(Body::from(body)).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }
}
