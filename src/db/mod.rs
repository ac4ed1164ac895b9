// Candle storage
pub mod memory;
pub mod postgres;

pub use memory::MemoryCandleStore;
pub use postgres::PostgresCandleStore;

use crate::error::AnalysisError;
use crate::models::Candle;
use chrono::{DateTime, Utc};
use std::future::Future;

/// Read/write access to persisted candle history
///
/// Injected into the strategy pipeline; the engine only ever reads through
/// it during backfill.
pub trait CandleStore: Send + Sync {
    /// Candles with `start <= timestamp <= end`, ascending
    fn get_candles(
        &self,
        market: &str,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Candle>, AnalysisError>> + Send;

    /// The `count` most recent candles with `timestamp <= at_or_before`, ascending
    fn get_past_candles(
        &self,
        market: &str,
        symbol: &str,
        timeframe: &str,
        at_or_before: DateTime<Utc>,
        count: usize,
    ) -> impl Future<Output = Result<Vec<Candle>, AnalysisError>> + Send;

    /// Persist a candle, returning its row id
    fn add_candle(&self, candle: &Candle)
        -> impl Future<Output = Result<i64, AnalysisError>> + Send;
}
