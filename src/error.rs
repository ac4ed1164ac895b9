use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised by the candle-analysis engine
///
/// Every runtime variant is recoverable at the orchestrator boundary: the
/// current candle is skipped and processing continues with the next one.
/// `Config` is only produced at startup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// Window and store together hold fewer candles than the lookback requires
    #[error(
        "insufficient history for {symbol} at {as_of}: need {required} candles, have {available}"
    )]
    InsufficientHistory {
        symbol: String,
        as_of: DateTime<Utc>,
        required: usize,
        available: usize,
    },

    /// A candle was compared against an anchor that lies after it
    #[error("candle at {candle} precedes anchor at {anchor}")]
    OutOfOrder {
        anchor: DateTime<Utc>,
        candle: DateTime<Utc>,
    },

    /// Inbound candle payload failed structural validation
    #[error("malformed candle payload: {0}")]
    MalformedInput(String),

    /// Candle store read or write failed
    #[error("candle store unavailable: {0}")]
    StoreUnavailable(String),

    /// Invalid startup configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AnalysisError {
    /// Whether the processing loop may continue after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AnalysisError::Config(_))
    }

    /// Short kind label for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::InsufficientHistory { .. } => "insufficient_history",
            AnalysisError::OutOfOrder { .. } => "out_of_order",
            AnalysisError::MalformedInput(_) => "malformed_input",
            AnalysisError::StoreUnavailable(_) => "store_unavailable",
            AnalysisError::Config(_) => "config",
        }
    }
}

impl From<sqlx::Error> for AnalysisError {
    fn from(err: sqlx::Error) -> Self {
        AnalysisError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for AnalysisError {
    fn from(err: serde_json::Error) -> Self {
        AnalysisError::MalformedInput(err.to_string())
    }
}
