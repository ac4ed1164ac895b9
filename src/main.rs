use clap::Parser;
use ifvgbot::config::AppConfig;
use ifvgbot::db::PostgresCandleStore;
use ifvgbot::ingest::parse_candle;
use ifvgbot::models::Signal;
use ifvgbot::persistence::{RedisCandleQueue, RedisSignalPublisher};
use ifvgbot::strategy::{Dispatcher, StrategyOrchestrator};
use ifvgbot::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;

/// How long a BLPOP waits before re-checking for shutdown
const POP_TIMEOUT: Duration = Duration::from_secs(1);
const SIGNAL_BUFFER: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "ifvgbot", about = "Streaming FVG inversion / liquidity raid signal engine")]
struct Args {
    /// Path to a config file (defaults to ./ifvgbot.toml if present)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref())?;

    tracing::info!("🚀 ifvgbot starting");
    tracing::info!("📊 Configuration:");
    tracing::info!("  Strategy: {}", config.strategy.name);
    tracing::info!("  Market: {} ({})", config.strategy.market, config.strategy.timeframe);
    tracing::info!("  Symbols: {}", config.strategy.symbols.join(", "));
    tracing::info!("  Timezone: {}", config.strategy.timezone);
    tracing::info!("  Lookback: {} candles", config.strategy.lookback);

    let store = Arc::new(PostgresCandleStore::new(&config.database_url).await?);
    let orchestrator = StrategyOrchestrator::new(&config.strategy, store)?;

    let mut queue = RedisCandleQueue::new(&config.redis_url, &config.candle_queue).await?;
    let publisher = RedisSignalPublisher::new(&config.redis_url, &config.signal_queue).await?;

    let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
    let publisher = tokio::spawn(signal_publish_loop(publisher, signal_rx));
    let dispatcher = orchestrator.spawn_workers(signal_tx);

    tracing::info!(
        "Listening for candles on redis list '{}'. Press Ctrl+C to stop...",
        queue.candle_queue()
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("⚠️  Received Ctrl+C, shutting down...");
        }
        _ = candle_intake_loop(&mut queue, &dispatcher) => {
            tracing::error!("Candle intake loop exited");
        }
    }

    // Drain queued candles, then let the publisher flush
    dispatcher.shutdown().await;
    if let Err(e) = publisher.await {
        tracing::error!("Signal publisher panicked: {}", e);
    }

    tracing::info!("👋 ifvgbot stopped");
    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ifvgbot=info,ifvgbot::strategy=debug".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Pop candle payloads and hand them to the symbol workers
async fn candle_intake_loop(queue: &mut RedisCandleQueue, dispatcher: &Dispatcher) {
    loop {
        let payload = match queue.pop_candle(POP_TIMEOUT).await {
            Ok(Some(payload)) => payload,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!("BLPOP error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let candle = match parse_candle(&payload) {
            Ok(candle) => candle,
            Err(e) => {
                tracing::warn!(kind = e.kind(), "Dropping candle payload: {}", e);
                continue;
            }
        };

        tracing::debug!(
            symbol = %candle.symbol,
            ts = %candle.timestamp.format("%Y-%m-%d %H:%M:%S"),
            "Received candle payload"
        );
        dispatcher.dispatch(candle).await;
    }
}

/// Push emitted signals onto the outbound Redis list
async fn signal_publish_loop(
    mut publisher: RedisSignalPublisher,
    mut signals: mpsc::Receiver<Signal>,
) {
    while let Some(signal) = signals.recv().await {
        if let Err(e) = publisher.publish_signal(&signal).await {
            tracing::error!(
                symbol = %signal.symbol,
                id = %signal.id,
                "Failed to publish signal: {}",
                e
            );
        }
    }
    tracing::info!("Signal publisher stopped");
}
