use crate::db::CandleStore;
use crate::error::AnalysisError;
use crate::models::Candle;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

/// Postgres-backed candle history
pub struct PostgresCandleStore {
    pool: PgPool,
}

impl PostgresCandleStore {
    /// Connect to Postgres and run migrations
    ///
    /// # Arguments
    /// * `database_url` - Postgres connection URL
    pub async fn new(database_url: &str) -> Result<Self, AnalysisError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AnalysisError::StoreUnavailable(e.to_string()))?;

        tracing::info!("Connected to Postgres at {}", database_url);

        Ok(Self { pool })
    }

    /// Wrap an existing pool (migrations are the caller's concern)
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete every candle for a symbol (testing only)
    #[cfg(test)]
    pub async fn clear_symbol(&self, market: &str, symbol: &str) -> Result<(), AnalysisError> {
        sqlx::query("DELETE FROM candles WHERE market = $1 AND symbol = $2")
            .bind(market)
            .bind(symbol)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn decimal_to_f64(value: Decimal, column: &str) -> Result<f64, AnalysisError> {
    value.to_string().parse::<f64>().map_err(|e| {
        AnalysisError::StoreUnavailable(format!("cannot decode {} '{}': {}", column, value, e))
    })
}

fn candle_from_row(row: &PgRow) -> Result<Candle, AnalysisError> {
    let open: Decimal = row.try_get("open")?;
    let high: Decimal = row.try_get("high")?;
    let low: Decimal = row.try_get("low")?;
    let close: Decimal = row.try_get("close")?;

    Ok(Candle {
        market: row.try_get("market")?,
        symbol: row.try_get("symbol")?,
        timeframe: row.try_get("timeframe")?,
        open: decimal_to_f64(open, "open")?,
        high: decimal_to_f64(high, "high")?,
        low: decimal_to_f64(low, "low")?,
        close: decimal_to_f64(close, "close")?,
        volume: row.try_get("volume")?,
        timestamp: row.try_get("timestamp")?,
    })
}

impl CandleStore for PostgresCandleStore {
    async fn get_candles(
        &self,
        market: &str,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, AnalysisError> {
        let rows = sqlx::query(
            r#"
            SELECT market, symbol, timeframe, open, high, low, close, volume, timestamp
            FROM candles
            WHERE market = $1
              AND symbol = $2
              AND timeframe = $3
              AND timestamp >= $4
              AND timestamp <= $5
            ORDER BY timestamp ASC
            "#,
        )
        .bind(market)
        .bind(symbol)
        .bind(timeframe)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let candles = rows
            .iter()
            .map(candle_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            "Loaded {} candles for {} between {} and {}",
            candles.len(),
            symbol,
            start,
            end
        );

        Ok(candles)
    }

    async fn get_past_candles(
        &self,
        market: &str,
        symbol: &str,
        timeframe: &str,
        at_or_before: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<Candle>, AnalysisError> {
        let rows = sqlx::query(
            r#"
            SELECT market, symbol, timeframe, open, high, low, close, volume, timestamp
            FROM candles
            WHERE market = $1
              AND symbol = $2
              AND timeframe = $3
              AND timestamp <= $4
            ORDER BY timestamp DESC
            LIMIT $5
            "#,
        )
        .bind(market)
        .bind(symbol)
        .bind(timeframe)
        .bind(at_or_before)
        .bind(count as i64)
        .fetch_all(&self.pool)
        .await?;

        // Newest-first from the query; callers expect ascending
        let mut candles = rows
            .iter()
            .map(candle_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        candles.reverse();

        tracing::debug!(
            "Loaded {} past candles for {} at or before {}",
            candles.len(),
            symbol,
            at_or_before
        );

        Ok(candles)
    }

    async fn add_candle(&self, candle: &Candle) -> Result<i64, AnalysisError> {
        let row = sqlx::query(
            r#"
            INSERT INTO candles (market, symbol, timeframe, open, high, low, close, volume, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (market, symbol, timeframe, timestamp) DO UPDATE SET
                open = EXCLUDED.open,
                high = EXCLUDED.high,
                low = EXCLUDED.low,
                close = EXCLUDED.close,
                volume = EXCLUDED.volume
            RETURNING id
            "#,
        )
        .bind(&candle.market)
        .bind(&candle.symbol)
        .bind(&candle.timeframe)
        .bind(candle.open)
        .bind(candle.high)
        .bind(candle.low)
        .bind(candle.close)
        .bind(candle.volume)
        .bind(candle.timestamp)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.try_get("id")?;

        tracing::debug!(
            "Saved candle {} {} at {} to Postgres",
            candle.symbol,
            candle.timeframe,
            candle.timestamp
        );

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    const TEST_DB: &str = "postgres://localhost/ifvgbot_test";

    fn create_test_candle(symbol: &str, minute: i64, price: f64) -> Candle {
        Candle {
            market: "test".to_string(),
            symbol: symbol.to_string(),
            timeframe: "1m".to_string(),
            open: price,
            high: price + 1.0,
            low: price - 1.0,
            close: price,
            volume: 100,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 4, 14, 0, 0).unwrap()
                + Duration::minutes(minute),
        }
    }

    #[test]
    fn test_decimal_to_f64() {
        let value = Decimal::new(1700025, 2);
        assert_eq!(decimal_to_f64(value, "close").unwrap(), 17000.25);
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_add_and_query_range() {
        let store = PostgresCandleStore::new(TEST_DB)
            .await
            .expect("Failed to connect to Postgres");
        store.clear_symbol("test", "PG_RANGE").await.unwrap();

        for minute in 0..5 {
            store
                .add_candle(&create_test_candle("PG_RANGE", minute, 100.0 + minute as f64))
                .await
                .unwrap();
        }

        let start = create_test_candle("PG_RANGE", 1, 0.0).timestamp;
        let end = create_test_candle("PG_RANGE", 3, 0.0).timestamp;
        let candles = store
            .get_candles("test", "PG_RANGE", "1m", start, end)
            .await
            .unwrap();

        assert_eq!(candles.len(), 3);
        assert_eq!(candles[0].close, 101.0);
        assert_eq!(candles[2].close, 103.0);

        store.clear_symbol("test", "PG_RANGE").await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_past_candles_are_ascending_and_limited() {
        let store = PostgresCandleStore::new(TEST_DB)
            .await
            .expect("Failed to connect to Postgres");
        store.clear_symbol("test", "PG_PAST").await.unwrap();

        for minute in 0..10 {
            store
                .add_candle(&create_test_candle("PG_PAST", minute, 100.0 + minute as f64))
                .await
                .unwrap();
        }

        let at = create_test_candle("PG_PAST", 7, 0.0).timestamp;
        let candles = store
            .get_past_candles("test", "PG_PAST", "1m", at, 3)
            .await
            .unwrap();

        assert_eq!(candles.len(), 3);
        assert_eq!(candles[0].close, 105.0);
        assert_eq!(candles[2].close, 107.0);

        store.clear_symbol("test", "PG_PAST").await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_add_candle_upserts() {
        let store = PostgresCandleStore::new(TEST_DB)
            .await
            .expect("Failed to connect to Postgres");
        store.clear_symbol("test", "PG_UPSERT").await.unwrap();

        let first = store
            .add_candle(&create_test_candle("PG_UPSERT", 0, 100.0))
            .await
            .unwrap();
        let second = store
            .add_candle(&create_test_candle("PG_UPSERT", 0, 150.0))
            .await
            .unwrap();
        assert_eq!(first, second);

        let at = create_test_candle("PG_UPSERT", 0, 0.0).timestamp;
        let candles = store
            .get_past_candles("test", "PG_UPSERT", "1m", at, 10)
            .await
            .unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, 150.0);

        store.clear_symbol("test", "PG_UPSERT").await.unwrap();
    }
}
