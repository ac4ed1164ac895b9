use crate::error::AnalysisError;
use crate::models::{minutes_between, Candle, Direction};
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Fill state of a fair value gap
///
/// Ordered so that a gap's status can only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GapStatus {
    Open,
    PartiallyFilled,
    Filled,
    Inversed,
}

/// Three-candle price imbalance
///
/// For a buy-side gap `start_price` is the first candle's high and
/// `end_price` the third candle's low; sell-side is the mirror image.
#[derive(Debug, Clone, PartialEq)]
pub struct FairValueGap {
    pub direction: Direction,
    pub start_price: f64,
    pub end_price: f64,
    /// Timestamp of the middle candle of the originating triple
    pub anchor: DateTime<Utc>,
    pub status: GapStatus,
    pub unfilled_price: f64,
    /// Timestamp of the last candle that traded into the gap
    pub last_affected: DateTime<Utc>,
}

impl FairValueGap {
    /// Detect a gap in three consecutive candles
    pub fn detect(c0: &Candle, c1: &Candle, c2: &Candle) -> Option<Self> {
        let (direction, start_price, end_price) = if c0.high < c2.low {
            (Direction::BuySide, c0.high, c2.low)
        } else if c0.low > c2.high {
            (Direction::SellSide, c0.low, c2.high)
        } else {
            return None;
        };

        Some(Self {
            direction,
            start_price,
            end_price,
            anchor: c1.timestamp,
            status: GapStatus::Open,
            unfilled_price: end_price,
            last_affected: c1.timestamp,
        })
    }

    /// Minutes from the anchor candle to `candle`
    pub fn age(&self, candle: &Candle) -> Result<i64, AnalysisError> {
        minutes_between(self.anchor, candle.timestamp)
    }

    /// Minutes from the anchor candle to the last candle that affected the gap
    pub fn width(&self) -> Result<i64, AnalysisError> {
        minutes_between(self.anchor, self.last_affected)
    }

    /// Minutes since the gap last changed; for an inversed gap, since inversion
    pub fn inversion_age(&self, candle: &Candle) -> Result<i64, AnalysisError> {
        minutes_between(self.last_affected, candle.timestamp)
    }

    pub fn is_inversed(&self) -> bool {
        self.status == GapStatus::Inversed
    }

    /// Apply one new candle. Returns true when this candle inverted the gap.
    pub fn process_candle(&mut self, candle: &Candle) -> bool {
        if self.is_inversed() {
            return false;
        }

        let next = match self.direction {
            Direction::BuySide => {
                if candle.low >= self.unfilled_price {
                    return false;
                }
                self.unfilled_price = candle.low.max(self.end_price);
                if candle.close < self.start_price {
                    GapStatus::Inversed
                } else if candle.low <= self.start_price {
                    GapStatus::Filled
                } else {
                    GapStatus::PartiallyFilled
                }
            }
            Direction::SellSide => {
                if candle.high <= self.unfilled_price {
                    return false;
                }
                self.unfilled_price = candle.high.min(self.end_price);
                if candle.close > self.start_price {
                    GapStatus::Inversed
                } else if candle.high >= self.start_price {
                    GapStatus::Filled
                } else {
                    GapStatus::PartiallyFilled
                }
            }
        };

        self.status = self.status.max(next);
        self.last_affected = candle.timestamp;
        self.is_inversed()
    }
}

/// Tracks every fair value gap for one symbol
#[derive(Debug, Clone)]
pub struct GapManager {
    recent: VecDeque<Candle>,
    gaps: Vec<FairValueGap>,
    retention: Duration,
}

impl GapManager {
    /// # Arguments
    /// * `retention_minutes` - Gaps anchored further back than this are dropped
    pub fn new(retention_minutes: i64) -> Self {
        Self {
            recent: VecDeque::with_capacity(3),
            gaps: Vec::new(),
            retention: Duration::minutes(retention_minutes),
        }
    }

    pub fn gaps(&self) -> &[FairValueGap] {
        &self.gaps
    }

    /// Feed the next candle in arrival order
    ///
    /// Existing gaps are updated first, then the latest three candles are
    /// checked for a new gap. Returns the new gap if one was created.
    pub fn process_candle(&mut self, candle: &Candle) -> Option<&FairValueGap> {
        for gap in self.gaps.iter_mut() {
            if !gap.process_candle(candle) {
                continue;
            }
            match gap.age(candle) {
                Ok(age) => tracing::info!(
                    symbol = %candle.symbol,
                    anchor = %gap.anchor,
                    direction = ?gap.direction,
                    age,
                    "FVG inversed"
                ),
                Err(e) => tracing::error!(symbol = %candle.symbol, error = %e, "FVG inversed out of order"),
            }
        }

        self.recent.push_back(candle.clone());
        while self.recent.len() > 3 {
            self.recent.pop_front();
        }

        self.prune(candle.timestamp);

        if self.recent.len() < 3 {
            return None;
        }

        let gap = FairValueGap::detect(&self.recent[0], &self.recent[1], &self.recent[2])?;
        tracing::debug!(
            symbol = %candle.symbol,
            anchor = %gap.anchor,
            direction = ?gap.direction,
            start = gap.start_price,
            end = gap.end_price,
            "FVG created"
        );
        self.gaps.push(gap);
        self.gaps.last()
    }

    /// Inversed gaps within the given bounds
    ///
    /// `max_age` bounds the minutes since inversion and `max_width` the
    /// minutes from anchor to inversion; `None` means unbounded.
    pub fn get_inverses(
        &self,
        candle: &Candle,
        max_age: Option<i64>,
        max_width: Option<i64>,
    ) -> Result<Vec<&FairValueGap>, AnalysisError> {
        let mut inverses = Vec::new();
        for gap in self.gaps.iter().filter(|g| g.is_inversed()) {
            let age = gap.inversion_age(candle)?;
            let width = gap.width()?;
            if max_age.map_or(true, |max| age <= max) && max_width.map_or(true, |max| width <= max)
            {
                inverses.push(gap);
            }
        }
        Ok(inverses)
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        let before = self.gaps.len();
        self.gaps.retain(|gap| gap.anchor >= cutoff);
        let dropped = before - self.gaps.len();
        if dropped > 0 {
            tracing::debug!(dropped, "Pruned expired FVGs");
        }
    }
}
