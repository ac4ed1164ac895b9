// iFVG / liquidity-raid strategy
pub mod fair_value_gap;
pub mod liquidity_pool;
pub mod orchestrator;
pub mod pipeline;
pub mod session;

pub use fair_value_gap::{FairValueGap, GapManager, GapStatus};
pub use liquidity_pool::{LiquidityPool, LiquidityPoolManager};
pub use orchestrator::{Dispatcher, StrategyOrchestrator};
pub use pipeline::{SignalRules, SymbolPipeline};
pub use session::Session;
