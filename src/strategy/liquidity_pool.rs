use crate::models::{Candle, Direction};
use crate::strategy::session::Session;
use crate::window::CandleWindow;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

/// Session extreme treated as a resting-liquidity level
///
/// A buy-side pool is a high that price must rise to; a sell-side pool is a
/// low that price must fall to.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidityPool {
    pub price: f64,
    pub direction: Direction,
    /// Timestamp of the candle that printed the extreme
    pub origin: DateTime<Utc>,
    pub label: String,
    pub raid_time: Option<DateTime<Utc>>,
    pub raid_candle: Option<Candle>,
}

impl LiquidityPool {
    pub fn new(price: f64, direction: Direction, origin: DateTime<Utc>, label: &str) -> Self {
        Self {
            price,
            direction,
            origin,
            label: label.to_string(),
            raid_time: None,
            raid_candle: None,
        }
    }

    pub fn is_raided(&self) -> bool {
        self.raid_time.is_some()
    }

    /// Whether `candle` trades through this level
    pub fn is_raided_by(&self, candle: &Candle) -> bool {
        match self.direction {
            Direction::BuySide => candle.high >= self.price,
            Direction::SellSide => candle.low <= self.price,
        }
    }

    fn mark_raided(&mut self, candle: &Candle) {
        self.raid_time = Some(candle.timestamp);
        self.raid_candle = Some(candle.clone());
    }
}

/// Active and raided liquidity pools for one symbol's trading day
#[derive(Debug, Clone, Default)]
pub struct LiquidityPoolManager {
    active: Vec<LiquidityPool>,
    raided: Vec<LiquidityPool>,
}

impl LiquidityPoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move every pool `candle` trades through from active to raided
    ///
    /// Returns how many pools were raided.
    pub fn update_active_pools(&mut self, candle: &Candle) -> usize {
        let mut raided = 0;
        // Back-to-front so removal doesn't disturb the unvisited prefix
        for i in (0..self.active.len()).rev() {
            if !self.active[i].is_raided_by(candle) {
                continue;
            }
            let mut pool = self.active.remove(i);
            pool.mark_raided(candle);
            tracing::info!(
                symbol = %candle.symbol,
                label = %pool.label,
                price = pool.price,
                "Liquidity pool raided"
            );
            self.raided.push(pool);
            raided += 1;
        }
        raided
    }

    /// Register a pool and check it against `trigger` straight away
    pub fn add_pool(&mut self, pool: LiquidityPool, trigger: &Candle) {
        tracing::debug!(
            label = %pool.label,
            price = pool.price,
            direction = ?pool.direction,
            "Liquidity pool registered"
        );
        self.active.push(pool);
        self.update_active_pools(trigger);
    }

    /// Active pools when `active` is true, raided pools otherwise
    pub fn get_pools(&self, active: bool) -> &[LiquidityPool] {
        if active {
            &self.active
        } else {
            &self.raided
        }
    }

    /// Drop all pools ahead of a new trading day
    pub fn reset(&mut self) {
        self.active.clear();
        self.raided.clear();
    }

    /// Reset and register the six session pools for `trading_day`
    ///
    /// Each of Asia / London / Pre-market contributes its high (buy-side) and
    /// low (sell-side). Sessions with no candles in the window are skipped.
    pub fn seed_sessions(
        &mut self,
        window: &CandleWindow,
        tz: &Tz,
        trading_day: NaiveDate,
        trigger: &Candle,
    ) -> usize {
        self.reset();

        let mut added = 0;
        for session in Session::ALL {
            let Some((start, end)) = session.window(tz, trading_day) else {
                tracing::warn!(session = session.name(), %trading_day, "Session bounds do not exist in local time");
                continue;
            };
            let Some((low, high)) = window.range_extrema(start, end) else {
                tracing::warn!(
                    symbol = %window.symbol(),
                    session = session.name(),
                    %start,
                    %end,
                    "No candles in session window, skipping pools"
                );
                continue;
            };

            let high_pool = LiquidityPool::new(
                high.high,
                Direction::BuySide,
                high.timestamp,
                &format!("{} High", session.name()),
            );
            let low_pool = LiquidityPool::new(
                low.low,
                Direction::SellSide,
                low.timestamp,
                &format!("{} Low", session.name()),
            );
            self.add_pool(high_pool, trigger);
            self.add_pool(low_pool, trigger);
            added += 2;
        }

        tracing::info!(
            symbol = %trigger.symbol,
            %trading_day,
            added,
            raided_on_open = self.raided.len(),
            "Seeded session liquidity pools"
        );

        added
    }
}
