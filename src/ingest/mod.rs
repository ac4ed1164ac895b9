// Inbound candle payloads
pub mod validator;

pub use validator::CandleValidator;

use crate::error::AnalysisError;
use crate::models::Candle;

/// Decode and validate one candle event
///
/// The payload is the JSON candle record with an RFC 3339 UTC timestamp. The
/// timestamp is truncated to the minute before validation. Any failure is
/// reported as `MalformedInput`.
///
/// # Example
/// ```
/// use ifvgbot::ingest::parse_candle;
///
/// let payload = r#"{"market":"futures","symbol":"NQ","timeframe":"1m",
///     "open":100.0,"high":101.0,"low":99.5,"close":100.5,"volume":42,
///     "timestamp":"2024-03-04T14:30:27Z"}"#;
/// let candle = parse_candle(payload).unwrap();
/// assert_eq!(candle.timestamp.to_rfc3339(), "2024-03-04T14:30:00+00:00");
/// ```
pub fn parse_candle(payload: &str) -> Result<Candle, AnalysisError> {
    let candle: Candle = serde_json::from_str(payload)?;
    let candle = candle.truncated();
    CandleValidator::new().validate(&candle)?;
    Ok(candle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "market": "futures", "symbol": "NQ", "timeframe": "1m",
        "open": 17000.0, "high": 17010.5, "low": 16995.25, "close": 17005.0,
        "volume": 1200, "timestamp": "2024-03-04T14:30:00Z"
    }"#;

    #[test]
    fn test_parse_valid_payload() {
        let candle = parse_candle(VALID).unwrap();
        assert_eq!(candle.symbol, "NQ");
        assert_eq!(candle.high, 17010.5);
        assert_eq!(candle.volume, 1200);
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let payload = r#"{"market":"futures","symbol":"NQ","timeframe":"1m",
            "open":1.0,"high":1.0,"low":1.0,"volume":1,"timestamp":"2024-03-04T14:30:00Z"}"#;
        assert!(matches!(
            parse_candle(payload),
            Err(AnalysisError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_bad_timestamp_is_malformed() {
        let payload = VALID.replace("2024-03-04T14:30:00Z", "yesterday");
        assert!(matches!(
            parse_candle(&payload),
            Err(AnalysisError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_not_json_is_malformed() {
        assert!(matches!(
            parse_candle("not json"),
            Err(AnalysisError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_invalid_ohlc_is_malformed() {
        let payload = VALID.replace("16995.25", "17020.0");
        assert!(matches!(
            parse_candle(&payload),
            Err(AnalysisError::MalformedInput(_))
        ));
    }
}
