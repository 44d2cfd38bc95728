pub mod order;
pub mod position;
pub mod price_bar;
pub mod risk_limits;
pub mod risk_metrics;
pub mod signal;
pub mod strategy_config;
pub mod trade;
pub mod trading_preferences;
pub mod user;
