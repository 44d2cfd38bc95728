use crate::domain::repositories::broker_client::Timeframe;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Where engine state lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

/// Process-level settings for the engine and its HTTP surface
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bind_addr: SocketAddr,
    pub store_backend: StoreBackend,
    /// Time between two trading cycles of one user
    pub loop_interval_seconds: u64,
    /// Upper bound of the retry delay after failed cycles
    pub max_backoff_seconds: u64,
    pub bar_timeframe: Timeframe,
    /// Bars fetched per symbol for indicator computation
    pub bar_lookback: usize,
    /// Daily bars used for the correlation matrix and volatility index
    pub correlation_lookback: usize,
    pub paper_starting_cash: f64,
    /// How often the paper market moves
    pub paper_tick_seconds: u64,
    pub rate_limit_per_minute: u32,
    /// Raw `user:key` pairs, parsed by [`crate::auth::ApiKeys::parse`]
    pub api_keys: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            store_backend: StoreBackend::Sqlite,
            loop_interval_seconds: 60,
            max_backoff_seconds: 900,
            bar_timeframe: Timeframe::Day,
            bar_lookback: 100,
            correlation_lookback: 30,
            paper_starting_cash: 100_000.0,
            paper_tick_seconds: 60,
            rate_limit_per_minute: 100,
            api_keys: String::new(),
        }
    }
}

/// Parse `raw` and keep it only when `valid` accepts it; otherwise warn and
/// leave `target` untouched.
fn apply<T, F>(name: &str, raw: Option<String>, target: &mut T, valid: F)
where
    T: FromStr + Display,
    T::Err: Display,
    F: Fn(&T) -> bool,
{
    let Some(raw) = raw else { return };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => *target = value,
        Ok(value) => {
            tracing::warn!("Invalid {} value: {}, using default: {}", name, value, target);
        }
        Err(e) => {
            tracing::warn!("Failed to parse {} '{}': {}, using default: {}", name, raw, e, target);
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> EngineConfig {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an injectable variable source
    pub fn from_lookup<L>(lookup: L) -> EngineConfig
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = EngineConfig::default();

        apply("BIND_ADDR", lookup("BIND_ADDR"), &mut config.bind_addr, |_| true);

        if let Some(backend) = lookup("STORE_BACKEND") {
            match backend.trim().to_ascii_lowercase().as_str() {
                "sqlite" => config.store_backend = StoreBackend::Sqlite,
                "memory" => config.store_backend = StoreBackend::Memory,
                other => tracing::warn!(
                    "Unknown STORE_BACKEND '{}' (expected sqlite or memory), using sqlite",
                    other
                ),
            }
        }

        apply(
            "LOOP_INTERVAL_SECONDS",
            lookup("LOOP_INTERVAL_SECONDS"),
            &mut config.loop_interval_seconds,
            |v| (1..=86_400).contains(v),
        );
        apply(
            "MAX_BACKOFF_SECONDS",
            lookup("MAX_BACKOFF_SECONDS"),
            &mut config.max_backoff_seconds,
            |v| *v >= 1,
        );

        if let Some(timeframe) = lookup("BAR_TIMEFRAME") {
            match Timeframe::parse(timeframe.trim()) {
                Some(value) => config.bar_timeframe = value,
                None => tracing::warn!(
                    "Invalid BAR_TIMEFRAME '{}' (expected 15Min, 1Hour or 1Day), using default: {}",
                    timeframe,
                    config.bar_timeframe.as_str()
                ),
            }
        }

        // enough history for the slowest indicator
        apply("BAR_LOOKBACK", lookup("BAR_LOOKBACK"), &mut config.bar_lookback, |v| {
            (30..=1_000).contains(v)
        });
        apply(
            "CORRELATION_LOOKBACK",
            lookup("CORRELATION_LOOKBACK"),
            &mut config.correlation_lookback,
            |v| (2..=365).contains(v),
        );
        apply(
            "PAPER_STARTING_CASH",
            lookup("PAPER_STARTING_CASH"),
            &mut config.paper_starting_cash,
            |v| v.is_finite() && *v > 0.0,
        );
        apply(
            "PAPER_TICK_SECONDS",
            lookup("PAPER_TICK_SECONDS"),
            &mut config.paper_tick_seconds,
            |v| *v >= 1,
        );
        apply(
            "RATE_LIMIT_PER_MINUTE",
            lookup("RATE_LIMIT_PER_MINUTE"),
            &mut config.rate_limit_per_minute,
            |v| *v >= 1,
        );

        if let Some(keys) = lookup("API_KEYS") {
            config.api_keys = keys;
        }

        if config.max_backoff_seconds < config.loop_interval_seconds {
            tracing::warn!(
                "MAX_BACKOFF_SECONDS ({}) is below LOOP_INTERVAL_SECONDS ({}), raising it",
                config.max_backoff_seconds,
                config.loop_interval_seconds
            );
            config.max_backoff_seconds = config.loop_interval_seconds;
        }

        config
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_secs(self.loop_interval_seconds)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_seconds)
    }

    pub fn paper_tick(&self) -> Duration {
        Duration::from_secs(self.paper_tick_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> EngineConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = config_from(&[]);
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.store_backend, StoreBackend::Sqlite);
        assert_eq!(config.loop_interval(), Duration::from_secs(60));
        assert_eq!(config.bar_timeframe, Timeframe::Day);
        assert_eq!(config.rate_limit_per_minute, 100);
        assert!(config.api_keys.is_empty());
    }

    #[test]
    fn test_valid_overrides() {
        let config = config_from(&[
            ("BIND_ADDR", "0.0.0.0:8080"),
            ("STORE_BACKEND", "Memory"),
            ("LOOP_INTERVAL_SECONDS", "300"),
            ("MAX_BACKOFF_SECONDS", "3600"),
            ("BAR_TIMEFRAME", "1Hour"),
            ("PAPER_STARTING_CASH", "25000.5"),
            ("API_KEYS", "alice:abc"),
        ]);
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.loop_interval_seconds, 300);
        assert_eq!(config.max_backoff_seconds, 3600);
        assert_eq!(config.bar_timeframe, Timeframe::Hour);
        assert_eq!(config.paper_starting_cash, 25_000.5);
        assert_eq!(config.api_keys, "alice:abc");
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config_from(&[
            ("BIND_ADDR", "not-an-address"),
            ("STORE_BACKEND", "postgres"),
            ("LOOP_INTERVAL_SECONDS", "0"),
            ("BAR_TIMEFRAME", "1Week"),
            ("BAR_LOOKBACK", "5"),
            ("PAPER_STARTING_CASH", "-10"),
            ("RATE_LIMIT_PER_MINUTE", "lots"),
        ]);
        let defaults = EngineConfig::default();
        assert_eq!(config.bind_addr, defaults.bind_addr);
        assert_eq!(config.store_backend, StoreBackend::Sqlite);
        assert_eq!(config.loop_interval_seconds, defaults.loop_interval_seconds);
        assert_eq!(config.bar_timeframe, Timeframe::Day);
        assert_eq!(config.bar_lookback, defaults.bar_lookback);
        assert_eq!(config.paper_starting_cash, defaults.paper_starting_cash);
        assert_eq!(config.rate_limit_per_minute, 100);
    }

    #[test]
    fn test_backoff_never_below_interval() {
        let config = config_from(&[("LOOP_INTERVAL_SECONDS", "600"), ("MAX_BACKOFF_SECONDS", "60")]);
        assert_eq!(config.max_backoff_seconds, 600);
    }
}
