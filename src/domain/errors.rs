use std::time::Duration;
use thiserror::Error;

/// Rejected input. Never retried, surfaced as a client error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} must be a finite non-negative number, got {value}")]
    NotFiniteNonNegative { field: &'static str, value: f64 },

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Request contains none of the recognized fields: {0}")]
    NoRecognizedFields(String),

    #[error("Emergency stop requires confirmation \"CONFIRM\"")]
    ConfirmationRequired,
}

/// Failure reported by the brokerage collaborator.
///
/// The split between transient and permanent failures drives the retry
/// policy: transient ones are retried on the next scheduled cycle, permanent
/// ones are logged against the originating signal and dropped.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BrokerError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Broker request timed out")]
    Timeout,

    #[error("Rate limited by broker (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Market data unavailable for {0}")]
    DataUnavailable(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Symbol not tradable: {0}")]
    SymbolNotTradable(String),

    #[error("Insufficient buying power: required {required:.2}, available {available:.2}")]
    InsufficientBuyingPower { required: f64, available: f64 },

    #[error("No open position for {0}")]
    PositionNotFound(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),
}

impl BrokerError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::Network(_)
                | BrokerError::Timeout
                | BrokerError::RateLimited { .. }
                | BrokerError::DataUnavailable(_)
        )
    }

    /// Short error code for logs
    pub fn error_code(&self) -> &'static str {
        match self {
            BrokerError::Network(_) => "ERR_BROKER_NETWORK",
            BrokerError::Timeout => "ERR_BROKER_TIMEOUT",
            BrokerError::RateLimited { .. } => "ERR_BROKER_RATE_LIMIT",
            BrokerError::DataUnavailable(_) => "ERR_DATA_UNAVAILABLE",
            BrokerError::OrderRejected(_) => "ERR_ORDER_REJECTED",
            BrokerError::SymbolNotTradable(_) => "ERR_NOT_TRADABLE",
            BrokerError::InsufficientBuyingPower { .. } => "ERR_BUYING_POWER",
            BrokerError::PositionNotFound(_) => "ERR_POSITION_NOT_FOUND",
            BrokerError::OrderNotFound(_) => "ERR_ORDER_NOT_FOUND",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Top-level error of engine operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Trading loop unavailable for user {0}")]
    LoopUnavailable(String),
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Broker(e) => e.is_transient(),
            EngineError::Store(StoreError::Unavailable(_)) => true,
            _ => false,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_error_classification() {
        assert!(BrokerError::Timeout.is_transient());
        assert!(BrokerError::Network("reset".to_string()).is_transient());
        assert!(BrokerError::RateLimited { retry_after: None }.is_transient());
        assert!(BrokerError::DataUnavailable("AAPL".to_string()).is_transient());

        assert!(!BrokerError::OrderRejected("halted".to_string()).is_transient());
        assert!(!BrokerError::SymbolNotTradable("XYZ".to_string()).is_transient());
        assert!(!BrokerError::InsufficientBuyingPower {
            required: 1000.0,
            available: 10.0
        }
        .is_transient());
    }

    #[test]
    fn test_engine_error_wraps_sources() {
        let err: EngineError = BrokerError::Timeout.into();
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "Broker request timed out");

        let err: EngineError = ValidationError::ConfirmationRequired.into();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::OutOfRange {
            field: "maxPositionSizePercent",
            value: 30.0,
            min: 5.0,
            max: 25.0,
        };
        assert_eq!(
            err.to_string(),
            "maxPositionSizePercent must be between 5 and 25, got 30"
        );
    }
}
