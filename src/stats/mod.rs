//! Stats aggregation.
//!
//! # Data Flow
//! ```text
//! POST stats {nodeId, window?, stats: [...]}
//!     → SyncService::report_stats
//!     → StatsAggregator::merge (last write wins per node/tag/window)
//!
//! Admin usage report
//!     → StatsAggregator::records_for(node)
//!     → summary::cumulative (per-tag totals across windows)
//! ```

pub mod aggregator;
pub mod summary;

pub use aggregator::{MergeOutcome, StatsAggregator, TrafficCounters, WindowRecord};
pub use summary::{cumulative, UsageTotal};
