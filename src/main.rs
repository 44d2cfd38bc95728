use std::sync::Arc;
use tradeguard::application::actors::trading_loop::{LoopContext, LoopSettings};
use tradeguard::application::handlers::router;
use tradeguard::application::services::trading_engine::TradingEngine;
use tradeguard::auth::ApiKeys;
use tradeguard::config::{EngineConfig, StoreBackend};
use tradeguard::domain::repositories::broker_client::{BrokerClient, Timeframe};
use tradeguard::domain::repositories::clock::{Clock, SystemClock};
use tradeguard::domain::repositories::engine_store::EngineStore;
use tradeguard::domain::services::risk_engine::RiskEngine;
use tradeguard::domain::services::signal_generator::SignalGenerator;
use tradeguard::infrastructure::paper_broker::PaperBroker;
use tradeguard::persistence::memory_store::InMemoryStore;
use tradeguard::persistence::repository::SqliteStore;
use tradeguard::persistence::{init_database, DatabaseConfig};
use tradeguard::rate_limit::{create_rate_limiter, RateLimiterConfig};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenvy::dotenv() {
        // a missing .env is the normal case in production
        if !e.not_found() {
            eprintln!("Failed to read .env: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tradeguard=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("TradeGuard engine starting...");

    let config = EngineConfig::from_env();
    let keys = match ApiKeys::parse(&config.api_keys) {
        Ok(keys) => Arc::new(keys),
        Err(e) => {
            error!("❌ Invalid API_KEYS: {}", e);
            return Err(e.into());
        }
    };
    info!("🔑 {} API keys loaded", keys.len());

    let store: Arc<dyn EngineStore> = match config.store_backend {
        StoreBackend::Sqlite => {
            let db_config = DatabaseConfig::from_env();
            let pool = init_database(&db_config).await.map_err(|e| {
                error!("❌ Database initialization failed: {}", e);
                e
            })?;
            info!("💾 SQLite store ready at {}", db_config.url);
            Arc::new(SqliteStore::new(pool))
        }
        StoreBackend::Memory => {
            warn!("⚠️ Using in-memory store, nothing survives a restart");
            Arc::new(InMemoryStore::new())
        }
    };

    let paper = Arc::new(PaperBroker::new(config.paper_starting_cash));
    let broker: Arc<dyn BrokerClient> = paper.clone();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let signals = Arc::new(SignalGenerator::new(
        broker.clone(),
        store.clone(),
        clock.clone(),
        config.bar_timeframe,
        config.bar_lookback,
    ));
    let risk = Arc::new(RiskEngine::new(
        broker.clone(),
        store.clone(),
        clock.clone(),
        Timeframe::Day,
        config.correlation_lookback,
    ));

    let engine = Arc::new(TradingEngine::new(
        LoopContext {
            broker,
            store,
            clock,
            signals,
            risk,
        },
        LoopSettings {
            interval: config.loop_interval(),
            max_backoff: config.max_backoff(),
        },
    ));

    match engine.resume_enabled_users().await {
        Ok(count) => info!("▶️ {} trading loops resumed", count),
        Err(e) => warn!("Could not resume trading loops: {}", e),
    }

    // Move the paper market forward
    let ticker = {
        let paper = paper.clone();
        let period = config.paper_tick();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                paper.advance().await;
            }
        })
    };

    let limiter = create_rate_limiter(RateLimiterConfig {
        requests_per_minute: config.rate_limit_per_minute,
    });
    let app = router(engine.clone(), keys, limiter);

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let server = axum::serve(listener, app);

    let shutdown_signal = async move {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    info!("Server started successfully. Press Ctrl+C to stop.");
    server.with_graceful_shutdown(shutdown_signal).await?;

    info!("Server shutting down gracefully...");
    ticker.abort();
    engine.shutdown().await;

    info!("Shutdown complete");
    Ok(())
}
