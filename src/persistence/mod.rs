//! Persistence Layer
//!
//! SQLite storage for everything the engine keeps per user, via sqlx.
//!
//! # Database Schema
//!
//! ## strategy_configs / risk_limits
//! One row per user; the record itself is a JSON document so bounded
//! fields can grow without schema changes.
//!
//! ## trading_preferences
//! - user_id, auto_trading_enabled, trading_status, last_toggle_time
//!
//! ## signals
//! Append-only decision log. `executed` is the only column ever updated.
//!
//! ## risk_metrics
//! Append-only snapshots, latest `calculated_at` is current.
//!
//! ## positions / trades
//! Current positions (open and closed) and the accepted-order ledger.

pub mod memory_store;
pub mod models;
pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database initialization error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),
}

/// Initialize the database connection pool and run migrations
///
/// # Arguments
/// - `config`: URL (e.g., "sqlite://data/tradeguard.db") and pool settings
pub async fn init_database(config: &DatabaseConfig) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", config.url);

    // Ensure data directory exists
    if let Some(db_path) = config.url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
            })?;
        }
    }

    let level = if config.log_queries {
        tracing::log::LevelFilter::Debug
    } else {
        tracing::log::LevelFilter::Trace
    };
    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .log_statements(level);

    // every connection to sqlite::memory: is a separate database
    let max_connections = if config.url.contains(":memory:") {
        1
    } else {
        config.max_connections
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "strategy_configs",
        r#"
        CREATE TABLE IF NOT EXISTS strategy_configs (
            user_id TEXT PRIMARY KEY,
            config_json TEXT NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    ),
    (
        "risk_limits",
        r#"
        CREATE TABLE IF NOT EXISTS risk_limits (
            user_id TEXT PRIMARY KEY,
            limits_json TEXT NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    ),
    (
        "trading_preferences",
        r#"
        CREATE TABLE IF NOT EXISTS trading_preferences (
            user_id TEXT PRIMARY KEY,
            auto_trading_enabled BOOLEAN NOT NULL DEFAULT 0,
            trading_status TEXT NOT NULL CHECK(trading_status IN ('active', 'paused', 'stopped')),
            last_toggle_time DATETIME
        )
        "#,
    ),
    (
        "signals",
        r#"
        CREATE TABLE IF NOT EXISTS signals (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            symbol TEXT NOT NULL,
            signal_type TEXT NOT NULL CHECK(signal_type IN ('buy', 'hold')),
            price REAL NOT NULL,
            stop_loss REAL NOT NULL,
            take_profit REAL NOT NULL,
            position_size INTEGER NOT NULL,
            risk_amount REAL NOT NULL,
            atr REAL NOT NULL,
            reason TEXT NOT NULL,
            indicators_json TEXT,
            executed BOOLEAN NOT NULL DEFAULT 0,
            order_id TEXT,
            executed_at DATETIME,
            created_at DATETIME NOT NULL
        )
        "#,
    ),
    (
        "risk_metrics",
        r#"
        CREATE TABLE IF NOT EXISTS risk_metrics (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            portfolio_value REAL NOT NULL,
            current_drawdown REAL NOT NULL,
            snapshot_json TEXT NOT NULL,
            calculated_at DATETIME NOT NULL
        )
        "#,
    ),
    (
        "positions",
        r#"
        CREATE TABLE IF NOT EXISTS positions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL CHECK(side IN ('long', 'short')),
            quantity REAL NOT NULL,
            entry_price REAL NOT NULL,
            current_price REAL NOT NULL,
            market_value REAL NOT NULL,
            cost_basis REAL NOT NULL,
            unrealized_pl REAL NOT NULL,
            unrealized_pl_percent REAL NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('open', 'closed')),
            opened_at DATETIME NOT NULL,
            closed_at DATETIME,
            close_price REAL,
            realized_pl REAL
        )
        "#,
    ),
    (
        "trades",
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL CHECK(side IN ('buy', 'sell')),
            quantity REAL NOT NULL,
            price REAL NOT NULL,
            order_id TEXT NOT NULL,
            signal_id TEXT,
            reason TEXT NOT NULL,
            executed_at DATETIME NOT NULL
        )
        "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_signals_user_created ON signals(user_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_metrics_user_calculated ON risk_metrics(user_id, calculated_at)",
    "CREATE INDEX IF NOT EXISTS idx_positions_user_status ON positions(user_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_trades_user_executed ON trades(user_id, executed_at)",
];

/// Run database migrations
async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    for (table, ddl) in MIGRATIONS {
        sqlx::query(ddl).execute(pool).await.map_err(|e| {
            DatabaseError::MigrationError(format!("Failed to create {} table: {}", table, e))
        })?;
    }

    for ddl in INDEXES {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;
    }

    info!("✓ Database migrations completed successfully");

    Ok(())
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/tradeguard.db")
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Log statements at debug level
    pub log_queries: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/tradeguard.db".to_string(),
            max_connections: 5,
            log_queries: cfg!(debug_assertions),
        }
    }
}

impl DatabaseConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let url = std::env::var("DATABASE_URL").unwrap_or(defaults.url);

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_connections);

        let log_queries = std::env::var("DATABASE_LOG_QUERIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.log_queries);

        Self {
            url,
            max_connections,
            log_queries,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            log_queries: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_init() {
        let pool = init_database(&DatabaseConfig::in_memory()).await;
        assert!(pool.is_ok());
    }

    #[tokio::test]
    async fn test_migrations() {
        let pool = init_database(&DatabaseConfig::in_memory()).await.unwrap();

        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN \
             ('strategy_configs', 'risk_limits', 'trading_preferences', 'signals', \
              'risk_metrics', 'positions', 'trades')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(result.0, 7);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = init_database(&DatabaseConfig::in_memory()).await.unwrap();
        assert!(run_migrations(&pool).await.is_ok());
    }

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.url, "sqlite://data/tradeguard.db");
        assert_eq!(config.max_connections, 5);
    }
}
