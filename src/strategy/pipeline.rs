use crate::config::{RetryConfig, StrategyConfig};
use crate::db::CandleStore;
use crate::error::AnalysisError;
use crate::models::{Candle, OrderType, Signal};
use crate::strategy::fair_value_gap::GapManager;
use crate::strategy::liquidity_pool::LiquidityPoolManager;
use crate::strategy::session::{is_session_open, seed_horizon, trading_day};
use crate::window::CandleWindow;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use rand::Rng;
use std::sync::Arc;
use uuid::Uuid;

/// Thresholds used by the signal search
#[derive(Debug, Clone, Copy)]
pub struct SignalRules {
    pub max_inverse_age: Option<i64>,
    pub max_inverse_width: Option<i64>,
    pub max_raid_age: i64,
    pub signal_ttl_minutes: i64,
}

impl From<&StrategyConfig> for SignalRules {
    fn from(config: &StrategyConfig) -> Self {
        // Negative bounds are unbounded
        Self {
            max_inverse_age: config.max_inverse_age.filter(|age| *age >= 0),
            max_inverse_width: config.max_inverse_width.filter(|width| *width >= 0),
            max_raid_age: config.max_raid_age,
            signal_ttl_minutes: config.signal_ttl_minutes,
        }
    }
}

/// All derived state for one tracked symbol
///
/// Candles must arrive one at a time in non-decreasing timestamp order.
pub struct SymbolPipeline<S> {
    symbol: String,
    window: CandleWindow,
    gaps: GapManager,
    pools: LiquidityPoolManager,
    store: Arc<S>,
    tz: Tz,
    lookback: usize,
    rules: SignalRules,
    retry: RetryConfig,
    last_processed: Option<DateTime<Utc>>,
}

impl<S: CandleStore> SymbolPipeline<S> {
    pub fn new(symbol: &str, config: &StrategyConfig, tz: Tz, store: Arc<S>) -> Self {
        Self {
            symbol: symbol.to_string(),
            window: CandleWindow::new(&config.market, symbol, &config.timeframe, config.lookback),
            gaps: GapManager::new(config.gap_retention_minutes),
            pools: LiquidityPoolManager::new(),
            store,
            tz,
            lookback: config.lookback,
            rules: SignalRules::from(config),
            retry: config.retry.clone(),
            last_processed: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn window(&self) -> &CandleWindow {
        &self.window
    }

    pub fn gaps(&self) -> &GapManager {
        &self.gaps
    }

    pub fn pools(&self) -> &LiquidityPoolManager {
        &self.pools
    }

    /// Run one candle through window, gaps, pools and the signal search
    ///
    /// Ordering and backfill errors leave gaps, pools and `last_processed`
    /// untouched, so the next candle can be processed normally. A signal
    /// search error comes after derived state has advanced for this candle.
    pub async fn process_candle(&mut self, candle: &Candle) -> Result<Vec<Signal>, AnalysisError> {
        let candle = candle.clone().truncated();

        if let Some(last) = self.last_processed {
            if candle.timestamp < last {
                return Err(AnalysisError::OutOfOrder {
                    anchor: last,
                    candle: candle.timestamp,
                });
            }
            if candle.timestamp == last {
                // Redelivery: refresh the slot, keep derived state as is
                tracing::debug!(symbol = %self.symbol, ts = %candle.timestamp, "Duplicate candle, window refreshed only");
                self.window.insert(candle);
                return Ok(Vec::new());
            }
        }

        self.window.insert(candle.clone());
        self.ensure_lookback_with_retry(&candle).await?;

        self.gaps.process_candle(&candle);
        self.pools.update_active_pools(&candle);
        self.last_processed = Some(candle.timestamp);

        if is_session_open(&self.tz, candle.timestamp) {
            let day = trading_day(&self.tz, candle.timestamp);
            tracing::info!(symbol = %self.symbol, %day, "Session open, re-seeding liquidity pools");
            self.pools.seed_sessions(&self.window, &self.tz, day, &candle);
        }

        // Keep what the next 09:30 seed will scan, even past the lookback
        self.window.evict_excess(seed_horizon(&self.tz, candle.timestamp));

        self.search_signals(&candle)
    }

    async fn ensure_lookback_with_retry(&mut self, candle: &Candle) -> Result<(), AnalysisError> {
        let mut attempt = 0;
        loop {
            match self
                .window
                .ensure_lookback(self.store.as_ref(), candle, self.lookback)
                .await
            {
                Err(AnalysisError::StoreUnavailable(reason))
                    if attempt + 1 < self.retry.max_attempts =>
                {
                    let delay = self.retry.delay_for(attempt);
                    let jitter = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 4);
                    let wait = delay + std::time::Duration::from_millis(jitter);
                    tracing::warn!(
                        symbol = %self.symbol,
                        attempt = attempt + 1,
                        wait_ms = wait.as_millis() as u64,
                        %reason,
                        "Backfill read failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Look for a recent pool raid paired with a gap inverted on this candle
    fn search_signals(&self, candle: &Candle) -> Result<Vec<Signal>, AnalysisError> {
        let inverses = self.gaps.get_inverses(
            candle,
            self.rules.max_inverse_age,
            self.rules.max_inverse_width,
        )?;
        if inverses.is_empty() {
            return Ok(Vec::new());
        }

        let mut signals = Vec::new();
        for pool in self.pools.get_pools(false) {
            let Some(raid_candle) = pool.raid_candle.as_ref() else {
                continue;
            };
            let raid_age = raid_candle.age(candle)?;
            if raid_age > self.rules.max_raid_age {
                continue;
            }

            let signal = Signal {
                id: Uuid::new_v4(),
                symbol: candle.symbol.clone(),
                action: pool.direction.reversal_action(),
                order_type: OrderType::Market,
                price: candle.close,
                stop_loss: None,
                take_profit: None,
                timestamp: candle.timestamp,
                cancel_time: candle.timestamp + Duration::minutes(self.rules.signal_ttl_minutes),
                label: pool.label.clone(),
            };

            tracing::info!(
                symbol = %signal.symbol,
                action = ?signal.action,
                price = signal.price,
                pool = %pool.label,
                raid_age,
                inverses = inverses.len(),
                "Signal emitted"
            );
            signals.push(signal);
        }

        Ok(signals)
    }

    /// Timestamp of the last candle that advanced derived state
    pub fn last_processed(&self) -> Option<DateTime<Utc>> {
        self.last_processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryCandleStore;
    use crate::models::Action;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    fn config(lookback: usize) -> StrategyConfig {
        StrategyConfig {
            symbols: vec!["X".to_string()],
            lookback,
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 2,
            },
            ..StrategyConfig::default()
        }
    }

    fn candle(ts: DateTime<Utc>, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            market: "futures".to_string(),
            symbol: "X".to_string(),
            timeframe: "1m".to_string(),
            open: close,
            high,
            low,
            close,
            volume: 1,
            timestamp: ts,
        }
    }

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, h, m, 0).unwrap()
    }

    fn pipeline(store: MemoryCandleStore, lookback: usize) -> SymbolPipeline<MemoryCandleStore> {
        SymbolPipeline::new("X", &config(lookback), New_York, Arc::new(store))
    }

    #[test]
    fn test_negative_bounds_are_unbounded() {
        let config = StrategyConfig {
            max_inverse_age: Some(-1),
            max_inverse_width: Some(20),
            ..StrategyConfig::default()
        };
        let rules = SignalRules::from(&config);
        assert_eq!(rules.max_inverse_age, None);
        assert_eq!(rules.max_inverse_width, Some(20));
    }

    #[tokio::test]
    async fn test_insufficient_history_skips_gap_update() {
        let mut pipeline = pipeline(MemoryCandleStore::new(), 3);

        let err = pipeline
            .process_candle(&candle(t(15, 0), 10.0, 8.0, 9.0))
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::InsufficientHistory { .. }));
        assert_eq!(pipeline.window().len(), 1);
        assert!(pipeline.last_processed().is_none());
    }

    #[tokio::test]
    async fn test_out_of_order_rejected() {
        let mut pipeline = pipeline(MemoryCandleStore::new(), 1);
        pipeline
            .process_candle(&candle(t(15, 5), 10.0, 8.0, 9.0))
            .await
            .unwrap();

        let err = pipeline
            .process_candle(&candle(t(15, 4), 10.0, 8.0, 9.0))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::OutOfOrder { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_does_not_advance_gaps() {
        let mut pipeline = pipeline(MemoryCandleStore::new(), 1);
        pipeline.process_candle(&candle(t(15, 0), 10.0, 8.0, 9.0)).await.unwrap();
        pipeline.process_candle(&candle(t(15, 1), 9.0, 7.0, 8.5)).await.unwrap();
        pipeline.process_candle(&candle(t(15, 1), 9.0, 7.0, 8.5)).await.unwrap();
        pipeline.process_candle(&candle(t(15, 2), 14.0, 13.0, 13.5)).await.unwrap();

        // Triple is 15:00, 15:01, 15:02 rather than 15:01 twice
        assert_eq!(pipeline.gaps().gaps().len(), 1);
        assert_eq!(pipeline.gaps().gaps()[0].start_price, 10.0);
    }

    #[tokio::test]
    async fn test_store_outage_is_retried() {
        let store = MemoryCandleStore::with_candles((0..5).map(|m| candle(t(14, m), 10.0, 9.0, 9.5)));
        store.fail_next_reads(2);
        let probe = store.clone();
        let mut pipeline = pipeline(store, 5);

        let result = pipeline.process_candle(&candle(t(14, 4), 10.0, 9.0, 9.5)).await;
        assert!(result.is_ok());
        assert_eq!(probe.read_count(), 3);
    }

    #[tokio::test]
    async fn test_store_outage_surfaces_after_max_attempts() {
        let store = MemoryCandleStore::with_candles((0..5).map(|m| candle(t(14, m), 10.0, 9.0, 9.5)));
        store.fail_next_reads(10);
        let probe = store.clone();
        let mut pipeline = pipeline(store, 5);

        let err = pipeline
            .process_candle(&candle(t(14, 4), 10.0, 9.0, 9.5))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::StoreUnavailable(_)));
        assert_eq!(probe.read_count(), 3);
    }

    #[tokio::test]
    async fn test_raid_plus_inversion_emits_reversal_signal() {
        let mut pipeline = pipeline(MemoryCandleStore::new(), 1);

        // London session (03:00-07:00 EST = 08:00-12:00 UTC) high at 120
        pipeline.process_candle(&candle(t(9, 0), 120.0, 100.0, 110.0)).await.unwrap();
        // Session open 09:30 EST = 14:30 UTC, pools seeded
        pipeline.process_candle(&candle(t(14, 30), 110.0, 105.0, 108.0)).await.unwrap();
        assert_eq!(pipeline.pools().get_pools(true).len(), 2);

        // Buy-side FVG: 14:31 high 109 < 14:33 low 112
        pipeline.process_candle(&candle(t(14, 31), 109.0, 106.0, 108.0)).await.unwrap();
        pipeline.process_candle(&candle(t(14, 32), 113.0, 108.5, 112.5)).await.unwrap();
        pipeline.process_candle(&candle(t(14, 33), 121.0, 112.0, 119.0)).await.unwrap();
        assert_eq!(pipeline.gaps().gaps().len(), 1);
        // 14:33 high 121 raided London High at 120
        assert_eq!(pipeline.pools().get_pools(false).len(), 1);

        // Close back below the gap start inverts it: sell after buy-side raid
        let signals = pipeline
            .process_candle(&candle(t(14, 35), 119.0, 107.0, 108.0))
            .await
            .unwrap();

        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.action, Action::Sell);
        assert_eq!(signal.price, 108.0);
        assert_eq!(signal.label, "London High");
        assert_eq!(signal.cancel_time, t(14, 45));
        assert!(signal.stop_loss.is_none());
        // Eviction ran on the signalling candle too
        assert_eq!(pipeline.window().len(), 1);
    }

    #[tokio::test]
    async fn test_session_extreme_beyond_lookback_is_seeded() {
        // Thirty stored London candles satisfy the lookback on the first live candle
        let history = (0..30).map(|m| candle(t(11, 30) + Duration::minutes(m), 101.0, 100.0, 100.5));
        let mut pipeline = pipeline(MemoryCandleStore::with_candles(history), 30);

        // Pre-market high of 200 at 12:00 UTC, then 149 quiet minutes
        pipeline.process_candle(&candle(t(12, 0), 200.0, 100.0, 150.0)).await.unwrap();
        for m in 1..150 {
            pipeline
                .process_candle(&candle(t(12, 0) + Duration::minutes(m), 101.0, 100.0, 100.5))
                .await
                .unwrap();
        }
        pipeline.process_candle(&candle(t(14, 30), 101.0, 100.0, 100.5)).await.unwrap();

        let high = pipeline
            .pools()
            .get_pools(true)
            .iter()
            .find(|p| p.label == "Pre-market High")
            .map(|p| p.price);
        assert_eq!(high, Some(200.0));

        // After the open the window shrinks back toward the lookback
        pipeline.process_candle(&candle(t(14, 31), 101.0, 100.0, 100.5)).await.unwrap();
        assert_eq!(pipeline.window().len(), 30);
    }

    #[tokio::test]
    async fn test_stale_raid_emits_nothing() {
        let mut pipeline = pipeline(MemoryCandleStore::new(), 1);

        pipeline.process_candle(&candle(t(9, 0), 120.0, 100.0, 110.0)).await.unwrap();
        pipeline.process_candle(&candle(t(14, 30), 121.0, 105.0, 108.0)).await.unwrap();
        assert_eq!(pipeline.pools().get_pools(false).len(), 1);

        pipeline.process_candle(&candle(t(14, 50), 109.0, 106.0, 108.0)).await.unwrap();
        pipeline.process_candle(&candle(t(14, 51), 113.0, 108.5, 112.5)).await.unwrap();
        pipeline.process_candle(&candle(t(14, 52), 115.0, 112.0, 114.0)).await.unwrap();
        let signals = pipeline
            .process_candle(&candle(t(14, 53), 113.0, 107.0, 108.0))
            .await
            .unwrap();

        assert!(signals.is_empty());
        assert_eq!(pipeline.gaps().get_inverses(&candle(t(14, 53), 0.0, 0.0, 0.0), Some(0), None).unwrap().len(), 1);
    }
}
