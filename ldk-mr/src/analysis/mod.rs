//! Pure market analysis: statistics, comp filtering, position and trend
//!
//! Nothing here touches the database or the network.

pub mod market;
pub mod stats;
pub mod trend;

pub use market::{
    analyze, classify_position, filter_comparables, summarize, MarketAnalysis, MarketSummary,
};
pub use trend::{
    compare_snapshots, evaluate_snapshot_alerts, trend_direction, AlertThresholds, SnapshotDelta,
    SnapshotPoint, TrendDirection,
};
