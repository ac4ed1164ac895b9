use crate::models::{Candle, Signal};
use crate::Result;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

/// Redis list the candle feed flows through
///
/// Candles are consumed with BLPOP on their own connection, so a blocking
/// pop never stalls pushes.
pub struct RedisCandleQueue {
    consumer: ConnectionManager,
    producer: ConnectionManager,
    candle_queue: String,
}

/// Outbound signal list; holds a single producer connection
pub struct RedisSignalPublisher {
    producer: ConnectionManager,
    signal_queue: String,
}

/// Open a managed connection, giving up after 5 seconds
async fn connect(client: Client) -> Result<ConnectionManager> {
    let manager = timeout(Duration::from_secs(5), ConnectionManager::new(client))
        .await
        .map_err(|_| "Redis connection timeout after 5 seconds")??;
    Ok(manager)
}

impl RedisCandleQueue {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `candle_queue` - List the candle feed is pushed onto
    pub async fn new(redis_url: &str, candle_queue: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let consumer = connect(client.clone()).await?;
        let producer = connect(client).await?;

        tracing::info!("Connected to Redis at {} (candles: '{}')", redis_url, candle_queue);

        Ok(Self {
            consumer,
            producer,
            candle_queue: candle_queue.to_string(),
        })
    }

    pub fn candle_queue(&self) -> &str {
        &self.candle_queue
    }

    /// Wait up to `wait` for the next raw candle payload
    ///
    /// Returns `None` on timeout so callers can check for shutdown.
    pub async fn pop_candle(&mut self, wait: Duration) -> Result<Option<String>> {
        let popped: Option<(String, String)> = self
            .consumer
            .blpop(&self.candle_queue, wait.as_secs_f64())
            .await?;

        Ok(popped.map(|(_, payload)| payload))
    }

    /// Append a candle to the feed
    pub async fn push_candle(&mut self, candle: &Candle) -> Result<()> {
        let payload = serde_json::to_string(candle)?;
        self.producer
            .rpush::<_, _, ()>(&self.candle_queue, payload)
            .await?;

        tracing::debug!(
            "Queued candle {} at {} on '{}'",
            candle.symbol,
            candle.timestamp,
            self.candle_queue
        );

        Ok(())
    }

    /// Current length of the candle queue
    pub async fn pending_candles(&mut self) -> Result<usize> {
        let len: usize = self.producer.llen(&self.candle_queue).await?;
        Ok(len)
    }

    /// Remove the candle queue (testing only)
    #[cfg(test)]
    async fn clear(&mut self) -> Result<()> {
        self.producer.del::<_, ()>(&self.candle_queue).await?;
        Ok(())
    }
}

impl RedisSignalPublisher {
    pub async fn new(redis_url: &str, signal_queue: &str) -> Result<Self> {
        let producer = connect(Client::open(redis_url)?).await?;

        tracing::info!("Connected to Redis at {} (signals: '{}')", redis_url, signal_queue);

        Ok(Self {
            producer,
            signal_queue: signal_queue.to_string(),
        })
    }

    /// Hand a signal to the execution side
    pub async fn publish_signal(&mut self, signal: &Signal) -> Result<()> {
        let payload = serde_json::to_string(signal)?;
        self.producer
            .rpush::<_, _, ()>(&self.signal_queue, payload)
            .await?;

        tracing::info!(
            "Published {:?} signal {} for {} on '{}'",
            signal.action,
            signal.id,
            signal.symbol,
            self.signal_queue
        );

        Ok(())
    }

    /// Signals waiting on the list
    pub async fn pending_signals(&mut self) -> Result<usize> {
        let len: usize = self.producer.llen(&self.signal_queue).await?;
        Ok(len)
    }

    /// Remove the signal queue (testing only)
    #[cfg(test)]
    async fn clear(&mut self) -> Result<()> {
        self.producer.del::<_, ()>(&self.signal_queue).await?;
        Ok(())
    }
}
