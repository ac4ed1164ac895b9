use crate::config::StrategyConfig;
use crate::db::CandleStore;
use crate::error::AnalysisError;
use crate::models::{Candle, Signal};
use crate::strategy::pipeline::SymbolPipeline;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Candles buffered per symbol before the dispatcher applies backpressure
const MAILBOX_SIZE: usize = 1024;

/// Owns one pipeline per tracked symbol and routes candles to them
pub struct StrategyOrchestrator<S> {
    name: String,
    pipelines: HashMap<String, SymbolPipeline<S>>,
}

impl<S: CandleStore + 'static> StrategyOrchestrator<S> {
    /// Build pipelines for every configured symbol
    ///
    /// Fails at startup if the configuration is unusable (e.g. unknown time zone).
    pub fn new(config: &StrategyConfig, store: Arc<S>) -> Result<Self, AnalysisError> {
        config.validate()?;
        let tz = config.tz()?;

        let pipelines = config
            .symbols
            .iter()
            .map(|symbol| {
                (
                    symbol.clone(),
                    SymbolPipeline::new(symbol, config, tz, store.clone()),
                )
            })
            .collect();

        tracing::info!(
            strategy = %config.name,
            symbols = ?config.symbols,
            timezone = %tz,
            lookback = config.lookback,
            "Strategy orchestrator ready"
        );

        Ok(Self {
            name: config.name.clone(),
            pipelines,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_tracked(&self, symbol: &str) -> bool {
        self.pipelines.contains_key(symbol)
    }

    pub fn pipeline(&self, symbol: &str) -> Option<&SymbolPipeline<S>> {
        self.pipelines.get(symbol)
    }

    /// Process one candle inline; candles for untracked symbols are ignored
    pub async fn process_candle(&mut self, candle: &Candle) -> Result<Vec<Signal>, AnalysisError> {
        match self.pipelines.get_mut(&candle.symbol) {
            Some(pipeline) => pipeline.process_candle(candle).await,
            None => {
                tracing::debug!(symbol = %candle.symbol, "Ignoring candle for untracked symbol");
                Ok(Vec::new())
            }
        }
    }

    /// Move each pipeline onto its own task
    ///
    /// Every symbol gets a serial mailbox, so one symbol's slow backfill never
    /// holds up another. Signals from all symbols are sent to `signal_tx`.
    pub fn spawn_workers(self, signal_tx: mpsc::Sender<Signal>) -> Dispatcher {
        let mut senders = HashMap::new();
        let mut handles = Vec::new();

        for (symbol, pipeline) in self.pipelines {
            let (tx, rx) = mpsc::channel(MAILBOX_SIZE);
            let signal_tx = signal_tx.clone();
            handles.push(tokio::spawn(run_worker(pipeline, rx, signal_tx)));
            senders.insert(symbol, tx);
        }

        tracing::info!(strategy = %self.name, workers = handles.len(), "Spawned symbol workers");

        Dispatcher { senders, handles }
    }
}

async fn run_worker<S: CandleStore>(
    mut pipeline: SymbolPipeline<S>,
    mut candles: mpsc::Receiver<Candle>,
    signals: mpsc::Sender<Signal>,
) {
    while let Some(candle) = candles.recv().await {
        match pipeline.process_candle(&candle).await {
            Ok(emitted) => {
                for signal in emitted {
                    if signals.send(signal).await.is_err() {
                        tracing::warn!(symbol = %pipeline.symbol(), "Signal channel closed, dropping signal");
                    }
                }
            }
            Err(e) => log_analysis_error(pipeline.symbol(), &candle, &e),
        }
    }

    tracing::info!(symbol = %pipeline.symbol(), "Symbol worker drained");
}

/// Log a per-candle failure at a level matching its kind
pub fn log_analysis_error(symbol: &str, candle: &Candle, err: &AnalysisError) {
    match err {
        AnalysisError::InsufficientHistory { .. } | AnalysisError::MalformedInput(_) => {
            tracing::warn!(symbol, ts = %candle.timestamp, kind = err.kind(), "Skipping candle: {}", err);
        }
        _ => {
            tracing::error!(symbol, ts = %candle.timestamp, kind = err.kind(), "Candle processing failed: {}", err);
        }
    }
}

/// Routes candles to the per-symbol worker tasks
pub struct Dispatcher {
    senders: HashMap<String, mpsc::Sender<Candle>>,
    handles: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Queue a candle for its symbol's worker
    ///
    /// Returns false when the symbol is not tracked or its worker is gone.
    pub async fn dispatch(&self, candle: Candle) -> bool {
        let Some(tx) = self.senders.get(&candle.symbol) else {
            tracing::debug!(symbol = %candle.symbol, "Ignoring candle for untracked symbol");
            return false;
        };
        let symbol = candle.symbol.clone();
        if tx.send(candle).await.is_err() {
            tracing::error!(%symbol, "Symbol worker stopped, candle dropped");
            return false;
        }
        true
    }

    pub fn symbols(&self) -> Vec<String> {
        self.senders.keys().cloned().collect()
    }

    /// Stop accepting candles and wait for queued ones to finish
    pub async fn shutdown(self) {
        drop(self.senders);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Symbol worker panicked: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::db::MemoryCandleStore;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn config() -> StrategyConfig {
        StrategyConfig {
            symbols: vec!["NQ".to_string(), "ES".to_string()],
            lookback: 1,
            retry: RetryConfig {
                max_attempts: 1,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
            ..StrategyConfig::default()
        }
    }

    fn candle(symbol: &str, minute: i64, high: f64, low: f64) -> Candle {
        let base: DateTime<Utc> = Utc.with_ymd_and_hms(2024, 1, 10, 16, 0, 0).unwrap();
        Candle {
            market: "futures".to_string(),
            symbol: symbol.to_string(),
            timeframe: "1m".to_string(),
            open: low,
            high,
            low,
            close: high,
            volume: 5,
            timestamp: base + Duration::minutes(minute),
        }
    }

    #[test]
    fn test_rejects_bad_timezone() {
        let config = StrategyConfig {
            timezone: "Nowhere/Special".to_string(),
            ..config()
        };
        let result = StrategyOrchestrator::new(&config, Arc::new(MemoryCandleStore::new()));
        assert!(matches!(result, Err(AnalysisError::Config(_))));
    }

    #[tokio::test]
    async fn test_untracked_symbol_is_noop() {
        let mut orchestrator =
            StrategyOrchestrator::new(&config(), Arc::new(MemoryCandleStore::new())).unwrap();

        let signals = orchestrator.process_candle(&candle("CL", 0, 10.0, 9.0)).await.unwrap();
        assert!(signals.is_empty());
        assert!(!orchestrator.is_tracked("CL"));
    }

    #[tokio::test]
    async fn test_symbols_are_independent() {
        let mut orchestrator =
            StrategyOrchestrator::new(&config(), Arc::new(MemoryCandleStore::new())).unwrap();

        orchestrator.process_candle(&candle("NQ", 0, 10.0, 8.0)).await.unwrap();
        orchestrator.process_candle(&candle("ES", 0, 50.0, 40.0)).await.unwrap();
        orchestrator.process_candle(&candle("NQ", 1, 9.0, 7.0)).await.unwrap();
        orchestrator.process_candle(&candle("ES", 1, 45.0, 41.0)).await.unwrap();
        orchestrator.process_candle(&candle("NQ", 2, 14.0, 13.0)).await.unwrap();

        assert_eq!(orchestrator.pipeline("NQ").unwrap().gaps().gaps().len(), 1);
        assert!(orchestrator.pipeline("ES").unwrap().gaps().gaps().is_empty());
    }

    #[tokio::test]
    async fn test_dispatcher_routes_and_drains() {
        let orchestrator =
            StrategyOrchestrator::new(&config(), Arc::new(MemoryCandleStore::new())).unwrap();
        let (signal_tx, _signal_rx) = mpsc::channel(16);
        let dispatcher = orchestrator.spawn_workers(signal_tx);

        let mut symbols = dispatcher.symbols();
        symbols.sort();
        assert_eq!(symbols, vec!["ES".to_string(), "NQ".to_string()]);

        assert!(dispatcher.dispatch(candle("NQ", 0, 10.0, 8.0)).await);
        assert!(!dispatcher.dispatch(candle("CL", 0, 10.0, 8.0)).await);

        tokio_test::assert_ok!(
            tokio::time::timeout(std::time::Duration::from_secs(5), dispatcher.shutdown()).await
        );
    }
}
