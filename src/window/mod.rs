use crate::db::CandleStore;
use crate::error::AnalysisError;
use crate::models::{truncate_to_minute, Candle};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Bounded per-symbol history of one-minute candles
///
/// Candles are keyed by their truncated-minute timestamp, so a later candle
/// for the same minute overwrites the earlier one. Holders of a gap or pool
/// refer back into the window by timestamp, never by reference.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    market: String,
    symbol: String,
    timeframe: String,
    candles: BTreeMap<DateTime<Utc>, Candle>,
    lookback: usize,
}

impl CandleWindow {
    /// Create an empty window
    ///
    /// # Arguments
    /// * `lookback` - Number of most recent candles kept after eviction
    pub fn new(market: &str, symbol: &str, timeframe: &str, lookback: usize) -> Self {
        Self {
            market: market.to_string(),
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            candles: BTreeMap::new(),
            lookback,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    /// Add or overwrite the candle at its truncated-minute slot
    pub fn insert(&mut self, candle: Candle) {
        let candle = candle.truncated();
        self.candles.insert(candle.timestamp, candle);
    }

    pub fn get(&self, timestamp: DateTime<Utc>) -> Option<&Candle> {
        self.candles.get(&truncate_to_minute(timestamp))
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn latest(&self) -> Option<&Candle> {
        self.candles.values().next_back()
    }

    /// Number of candles with timestamp at or before `as_of`
    pub fn count_at_or_before(&self, as_of: DateTime<Utc>) -> usize {
        self.candles.range(..=as_of).count()
    }

    /// Make sure at least `n` candles at or before `as_of` are present
    ///
    /// Pulls the `n` most recent candles from the store when the window is
    /// short. Fails with `InsufficientHistory` if the store cannot make up
    /// the difference either; store errors are passed through untouched so the
    /// caller can retry.
    pub async fn ensure_lookback<S: CandleStore>(
        &mut self,
        store: &S,
        as_of: &Candle,
        n: usize,
    ) -> Result<(), AnalysisError> {
        let as_of_ts = truncate_to_minute(as_of.timestamp);
        let have = self.count_at_or_before(as_of_ts);
        if have >= n {
            return Ok(());
        }

        tracing::debug!(
            symbol = %self.symbol,
            have,
            need = n,
            "Backfilling candle window from store"
        );

        let past = store
            .get_past_candles(&self.market, &self.symbol, &self.timeframe, as_of_ts, n)
            .await?;
        let fetched = past.len();
        for candle in past {
            // Never clobber live candles with stored copies
            let ts = truncate_to_minute(candle.timestamp);
            self.candles.entry(ts).or_insert_with(|| candle.truncated());
        }

        let available = self.count_at_or_before(as_of_ts);
        if available < n {
            return Err(AnalysisError::InsufficientHistory {
                symbol: self.symbol.clone(),
                as_of: as_of_ts,
                required: n,
                available,
            });
        }

        tracing::info!(
            symbol = %self.symbol,
            fetched,
            available,
            "Backfilled candle window"
        );

        Ok(())
    }

    /// Candles with the minimum low and the maximum high in `[start, end]`
    ///
    /// Minutes with no candle contribute nothing. Returns `None` when the
    /// interval holds no candles at all. Ties keep the earliest candle.
    pub fn range_extrema(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<(&Candle, &Candle)> {
        if end < start {
            return None;
        }

        let mut lowest: Option<&Candle> = None;
        let mut highest: Option<&Candle> = None;
        for candle in self.candles.range(start..=end).map(|(_, c)| c) {
            if lowest.map_or(true, |l| candle.low < l.low) {
                lowest = Some(candle);
            }
            if highest.map_or(true, |h| candle.high > h.high) {
                highest = Some(candle);
            }
        }

        lowest.zip(highest)
    }

    /// Evict every candle older than `before`, returning how many were removed
    pub fn trim(&mut self, before: DateTime<Utc>) -> usize {
        let kept = self.candles.split_off(&before);
        let removed = self.candles.len();
        self.candles = kept;
        removed
    }

    /// Evict the oldest candles beyond the lookback size
    ///
    /// Candles at or after `keep_from` are kept even past the lookback, so a
    /// pending session scan still sees its whole range.
    pub fn evict_excess(&mut self, keep_from: Option<DateTime<Utc>>) -> usize {
        if self.candles.len() <= self.lookback {
            return 0;
        }
        let Some(cutoff) = self
            .candles
            .keys()
            .rev()
            .nth(self.lookback.saturating_sub(1))
            .copied()
        else {
            return 0;
        };
        let cutoff = keep_from.map_or(cutoff, |keep| cutoff.min(keep));
        self.trim(cutoff)
    }
}
