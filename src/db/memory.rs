use crate::db::CandleStore;
use crate::error::AnalysisError;
use crate::models::Candle;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

type SeriesKey = (String, String, String);

/// In-process candle store
///
/// Keeps one ordered series per `(market, symbol, timeframe)`. Reads can be
/// made to fail a set number of times to exercise the backfill retry path.
#[derive(Clone, Default)]
pub struct MemoryCandleStore {
    series: Arc<RwLock<HashMap<SeriesKey, BTreeMap<DateTime<Utc>, Candle>>>>,
    /// Row id per unique candle key, stable across upserts
    ids: Arc<RwLock<HashMap<(SeriesKey, DateTime<Utc>), i64>>>,
    next_id: Arc<AtomicI64>,
    failures_left: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
}

impl MemoryCandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with pre-loaded history
    pub fn with_candles(candles: impl IntoIterator<Item = Candle>) -> Self {
        let store = Self::new();
        store.insert_all(candles);
        store
    }

    pub fn insert_all(&self, candles: impl IntoIterator<Item = Candle>) {
        if let Ok(mut series) = self.series.write() {
            for candle in candles {
                series
                    .entry(key_of(&candle.market, &candle.symbol, &candle.timeframe))
                    .or_default()
                    .insert(candle.timestamp, candle);
            }
        }
    }

    /// Make the next `n` reads return `StoreUnavailable`
    pub fn fail_next_reads(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Number of read calls served or failed so far
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Candles stored for a symbol across all timeframes
    pub fn len(&self, symbol: &str) -> usize {
        self.series
            .read()
            .map(|series| {
                series
                    .iter()
                    .filter(|((_, s, _), _)| s == symbol)
                    .map(|(_, candles)| candles.len())
                    .sum()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.series
            .read()
            .map(|series| series.values().all(|c| c.is_empty()))
            .unwrap_or(true)
    }

    fn begin_read(&self) -> Result<(), AnalysisError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(AnalysisError::StoreUnavailable(
                "injected read failure".to_string(),
            ));
        }
        Ok(())
    }
}

fn key_of(market: &str, symbol: &str, timeframe: &str) -> SeriesKey {
    (market.to_string(), symbol.to_string(), timeframe.to_string())
}

fn poisoned<E: std::fmt::Display>(e: E) -> AnalysisError {
    AnalysisError::StoreUnavailable(e.to_string())
}

impl CandleStore for MemoryCandleStore {
    async fn get_candles(
        &self,
        market: &str,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, AnalysisError> {
        self.begin_read()?;
        if end < start {
            return Ok(Vec::new());
        }
        let series = self.series.read().map_err(poisoned)?;
        Ok(series
            .get(&key_of(market, symbol, timeframe))
            .map(|candles| candles.range(start..=end).map(|(_, c)| c.clone()).collect())
            .unwrap_or_default())
    }

    async fn get_past_candles(
        &self,
        market: &str,
        symbol: &str,
        timeframe: &str,
        at_or_before: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<Candle>, AnalysisError> {
        self.begin_read()?;
        let series = self.series.read().map_err(poisoned)?;
        let mut candles: Vec<Candle> = series
            .get(&key_of(market, symbol, timeframe))
            .map(|candles| {
                candles
                    .range(..=at_or_before)
                    .rev()
                    .take(count)
                    .map(|(_, c)| c.clone())
                    .collect()
            })
            .unwrap_or_default();
        candles.reverse();
        Ok(candles)
    }

    async fn add_candle(&self, candle: &Candle) -> Result<i64, AnalysisError> {
        let key = key_of(&candle.market, &candle.symbol, &candle.timeframe);
        let mut series = self.series.write().map_err(poisoned)?;
        let mut ids = self.ids.write().map_err(poisoned)?;

        let id = *ids
            .entry((key.clone(), candle.timestamp))
            .or_insert_with(|| self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        series
            .entry(key)
            .or_default()
            .insert(candle.timestamp, candle.clone());
        Ok(id)
    }
}
