use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::AnalysisError;

/// Upper bound for minute-valued strategy settings (one week)
pub const MAX_MINUTES: i64 = 7 * 24 * 60;

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub redis_url: String,
    pub database_url: String,
    /// Redis list the candle feed is pushed onto
    pub candle_queue: String,
    /// Redis list emitted signals are pushed onto
    pub signal_queue: String,
    pub strategy: StrategyConfig,
}

/// Configuration for the iFVG / liquidity-raid strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    pub market: String,
    pub timeframe: String,
    pub symbols: Vec<String>,
    /// IANA zone the exchange sessions are defined in
    pub timezone: String,
    /// Candles required before a symbol is analysed (2880 = two days of 1m bars)
    pub lookback: usize,
    /// Minutes since inversion for a gap to count (0 = this candle only)
    pub max_inverse_age: Option<i64>,
    /// Minutes from gap anchor to inversion
    pub max_inverse_width: Option<i64>,
    /// Minutes since a pool raid for it to still set up a signal
    pub max_raid_age: i64,
    pub gap_retention_minutes: i64,
    pub signal_ttl_minutes: i64,
    pub retry: RetryConfig,
}

/// Backoff policy for store reads during backfill
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 250,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based), without jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            name: "iFVG Strat".to_string(),
            market: "futures".to_string(),
            timeframe: "1m".to_string(),
            symbols: vec!["NQ".to_string()],
            timezone: "America/New_York".to_string(),
            lookback: 2880,
            max_inverse_age: Some(0),
            max_inverse_width: Some(20),
            max_raid_age: 10,
            gap_retention_minutes: 2880,
            signal_ttl_minutes: 10,
            retry: RetryConfig::default(),
        }
    }
}

impl StrategyConfig {
    /// Resolve the exchange time zone
    pub fn tz(&self) -> Result<Tz, AnalysisError> {
        self.timezone.parse::<Tz>().map_err(|e| {
            AnalysisError::Config(format!("unknown timezone '{}': {}", self.timezone, e))
        })
    }

    /// Startup-time sanity checks
    pub fn validate(&self) -> Result<(), AnalysisError> {
        self.tz()?;
        if self.symbols.is_empty() {
            return Err(AnalysisError::Config("no symbols configured".into()));
        }
        if self.symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(AnalysisError::Config("blank symbol in symbol list".into()));
        }
        if self.lookback == 0 {
            return Err(AnalysisError::Config("lookback must be positive".into()));
        }
        if self.gap_retention_minutes <= 0 {
            return Err(AnalysisError::Config(
                "gap_retention_minutes must be positive".into(),
            ));
        }
        check_minutes("gap_retention_minutes", self.gap_retention_minutes)?;
        check_minutes("signal_ttl_minutes", self.signal_ttl_minutes)?;
        check_minutes("max_raid_age", self.max_raid_age)?;
        if self.retry.max_attempts == 0 {
            return Err(AnalysisError::Config("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

fn check_minutes(field: &str, value: i64) -> Result<(), AnalysisError> {
    if !(0..=MAX_MINUTES).contains(&value) {
        return Err(AnalysisError::Config(format!(
            "{} must be within 0..={} minutes, got {}",
            field, MAX_MINUTES, value
        )));
    }
    Ok(())
}

impl AppConfig {
    /// Load configuration from defaults, an optional file and `IFVG__*` env vars
    ///
    /// # Example
    /// ```no_run
    /// use ifvgbot::config::AppConfig;
    ///
    /// // IFVG__STRATEGY__SYMBOLS=NQ,ES overrides the tracked symbols
    /// let config = AppConfig::load(None).unwrap();
    /// assert!(!config.strategy.symbols.is_empty());
    /// ```
    pub fn load(path: Option<&str>) -> Result<Self, AnalysisError> {
        let defaults = StrategyConfig::default();
        let retry = RetryConfig::default();

        let builder = Config::builder()
            .set_default("redis_url", "redis://127.0.0.1:6379")
            .and_then(|b| b.set_default("database_url", "postgres://localhost/ifvgbot"))
            .and_then(|b| b.set_default("candle_queue", "market"))
            .and_then(|b| b.set_default("signal_queue", "signals"))
            .and_then(|b| b.set_default("strategy.name", defaults.name.clone()))
            .and_then(|b| b.set_default("strategy.market", defaults.market.clone()))
            .and_then(|b| b.set_default("strategy.timeframe", defaults.timeframe.clone()))
            .and_then(|b| b.set_default("strategy.symbols", defaults.symbols.clone()))
            .and_then(|b| b.set_default("strategy.timezone", defaults.timezone.clone()))
            .and_then(|b| b.set_default("strategy.lookback", defaults.lookback as i64))
            .and_then(|b| b.set_default("strategy.max_inverse_age", defaults.max_inverse_age))
            .and_then(|b| b.set_default("strategy.max_inverse_width", defaults.max_inverse_width))
            .and_then(|b| b.set_default("strategy.max_raid_age", defaults.max_raid_age))
            .and_then(|b| {
                b.set_default("strategy.gap_retention_minutes", defaults.gap_retention_minutes)
            })
            .and_then(|b| b.set_default("strategy.signal_ttl_minutes", defaults.signal_ttl_minutes))
            .and_then(|b| b.set_default("strategy.retry.max_attempts", retry.max_attempts as i64))
            .and_then(|b| b.set_default("strategy.retry.base_delay_ms", retry.base_delay_ms as i64))
            .and_then(|b| b.set_default("strategy.retry.max_delay_ms", retry.max_delay_ms as i64))
            .map_err(|e| AnalysisError::Config(e.to_string()))?;

        let file = match path {
            Some(p) => File::with_name(p).required(true),
            None => File::with_name("ifvgbot").required(false),
        };

        let config: AppConfig = builder
            .add_source(file)
            .add_source(
                Environment::with_prefix("IFVG")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("strategy.symbols"),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| AnalysisError::Config(e.to_string()))?;

        config.strategy.validate()?;
        Ok(config)
    }
}
