use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AnalysisError;

/// One-minute OHLCV bar for a single market/symbol/timeframe
///
/// Identified by `(market, symbol, timeframe, timestamp)`; never mutated
/// after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub market: String,
    pub symbol: String,
    pub timeframe: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub timestamp: DateTime<Utc>,
}

impl Candle {
    /// Whole minutes from `self` to `other`
    ///
    /// Fails with `OutOfOrder` when `other` is earlier than `self`.
    pub fn age(&self, other: &Candle) -> Result<i64, AnalysisError> {
        minutes_between(self.timestamp, other.timestamp)
    }

    /// Copy of this candle with its timestamp truncated to the minute
    pub fn truncated(mut self) -> Self {
        self.timestamp = truncate_to_minute(self.timestamp);
        self
    }
}

/// Whole minutes elapsed from `anchor` to `at`
pub fn minutes_between(anchor: DateTime<Utc>, at: DateTime<Utc>) -> Result<i64, AnalysisError> {
    if at < anchor {
        return Err(AnalysisError::OutOfOrder { anchor, candle: at });
    }
    Ok((at - anchor).num_minutes())
}

/// Drop seconds and sub-second precision
pub fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::minutes(1)).unwrap_or(ts)
}

/// Side of the book a structure belongs to
///
/// For gaps this is the imbalance direction; for liquidity pools a buy-side
/// pool is a high (resting buy stops above) and a sell-side pool is a low.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Direction {
    #[serde(rename = "buyside")]
    BuySide,
    #[serde(rename = "sellside")]
    SellSide,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
}

impl Direction {
    /// Reversal action after this side's liquidity has been taken
    pub fn reversal_action(&self) -> Action {
        match self {
            Direction::BuySide => Action::Sell,
            Direction::SellSide => Action::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

/// Trade signal handed to the execution collaborator
///
/// Sizing (`stop_loss` / `take_profit`) is left to the consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub id: Uuid,
    pub symbol: String,
    pub action: Action,
    #[serde(rename = "orderType")]
    pub order_type: OrderType,
    pub price: f64,
    #[serde(rename = "stopLoss")]
    pub stop_loss: Option<f64>,
    #[serde(rename = "takeProfit")]
    pub take_profit: Option<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "cancelTime")]
    pub cancel_time: DateTime<Utc>,
    /// Label of the liquidity pool whose raid set this up
    pub label: String,
}
