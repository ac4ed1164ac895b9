use crate::error::AnalysisError;
use crate::models::Candle;

/// Structural checks for inbound candles
pub struct CandleValidator;

impl CandleValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a candle, reporting the first problem as `MalformedInput`
    pub fn validate(&self, candle: &Candle) -> Result<(), AnalysisError> {
        self.validate_identifiers(candle)?;
        self.validate_prices(candle)?;
        self.validate_ohlc_relationship(candle)?;
        Ok(())
    }

    fn validate_identifiers(&self, candle: &Candle) -> Result<(), AnalysisError> {
        for (field, value) in [
            ("market", &candle.market),
            ("symbol", &candle.symbol),
            ("timeframe", &candle.timeframe),
        ] {
            if value.trim().is_empty() {
                return Err(malformed(format!("Missing {}", field)));
            }
        }
        Ok(())
    }

    /// Prices must be finite and positive, volume non-negative
    fn validate_prices(&self, candle: &Candle) -> Result<(), AnalysisError> {
        for (field, value) in [
            ("open", candle.open),
            ("high", candle.high),
            ("low", candle.low),
            ("close", candle.close),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(malformed(format!("Invalid {} price: {}", field, value)));
            }
        }
        if candle.volume < 0 {
            return Err(malformed(format!("Invalid volume: {}", candle.volume)));
        }
        Ok(())
    }

    fn validate_ohlc_relationship(&self, candle: &Candle) -> Result<(), AnalysisError> {
        if candle.high < candle.low {
            return Err(malformed(format!(
                "High ({}) is less than low ({})",
                candle.high, candle.low
            )));
        }

        let body_high = candle.open.max(candle.close);
        let body_low = candle.open.min(candle.close);
        if candle.high < body_high {
            return Err(malformed(format!(
                "High ({}) is below candle body ({})",
                candle.high, body_high
            )));
        }
        if candle.low > body_low {
            return Err(malformed(format!(
                "Low ({}) is above candle body ({})",
                candle.low, body_low
            )));
        }

        Ok(())
    }
}

impl Default for CandleValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn malformed(reason: String) -> AnalysisError {
    AnalysisError::MalformedInput(reason)
}
