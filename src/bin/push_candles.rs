//! Ingestion tool: store candles and feed them to the analysis queue
//!
//! Reads one JSON candle per line (file or stdin), validates it, appends it
//! to the Postgres candle store and pushes it onto the Redis candle list.
//!
//! Usage:
//!   cargo run --bin push_candles -- --input candles.jsonl
//!   cat candles.jsonl | cargo run --bin push_candles -- --no-queue

use anyhow::{Context, Result};
use clap::Parser;
use ifvgbot::config::AppConfig;
use ifvgbot::db::{CandleStore, PostgresCandleStore};
use ifvgbot::ingest::parse_candle;
use ifvgbot::persistence::RedisCandleQueue;
use std::io::{BufRead, BufReader};

#[derive(Parser, Debug)]
#[command(name = "push_candles", about = "Store candles and push them onto the candle queue")]
struct Args {
    /// JSON-lines file of candles; stdin when omitted
    #[arg(short, long)]
    input: Option<String>,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Skip writing to Postgres
    #[arg(long)]
    no_store: bool,

    /// Skip pushing onto the Redis candle list
    #[arg(long)]
    no_queue: bool,
}

#[derive(Debug, Default)]
struct PushStats {
    read: usize,
    malformed: usize,
    stored: usize,
    queued: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter("ifvgbot=info,push_candles=info")
        .init();

    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            std::fs::File::open(path).with_context(|| format!("Cannot open {}", path))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    let store = if args.no_store {
        None
    } else {
        Some(
            PostgresCandleStore::new(&config.database_url)
                .await
                .context("Failed to connect to Postgres")?,
        )
    };

    let mut queue = if args.no_queue {
        None
    } else {
        Some(
            RedisCandleQueue::new(&config.redis_url, &config.candle_queue)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to Redis: {}", e))?,
        )
    };

    let mut stats = PushStats::default();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }
        stats.read += 1;

        let candle = match parse_candle(&line) {
            Ok(candle) => candle,
            Err(e) => {
                tracing::warn!("Line {}: {}", line_no + 1, e);
                stats.malformed += 1;
                continue;
            }
        };

        if let Some(store) = &store {
            store
                .add_candle(&candle)
                .await
                .with_context(|| format!("Failed to store candle on line {}", line_no + 1))?;
            stats.stored += 1;
        }

        if let Some(queue) = queue.as_mut() {
            queue
                .push_candle(&candle)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to queue candle: {}", e))?;
            stats.queued += 1;
        }
    }

    tracing::info!(
        "✅ Done: {} read, {} malformed, {} stored, {} queued",
        stats.read,
        stats.malformed,
        stats.stored,
        stats.queued
    );

    Ok(())
}
