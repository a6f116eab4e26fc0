pub mod extract;
pub mod normalizer;
pub mod types;

pub use normalizer::{classify_pnl, normalize, trade_events};
pub use types::{ChartModel, EquityPoint, RunRecord, RunSummary, TradeOutcome};
