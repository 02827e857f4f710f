//! Per-window traffic counters reported by agents.

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::model::{unix_now, NodeId};
use crate::observability::metrics;
use crate::sync::types::StatsEntry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficCounters {
    pub uplink: u64,
    pub downlink: u64,
}

/// Counters for one (node, tag, window).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowRecord {
    pub node_id: NodeId,
    pub tag: String,
    pub window: u64,
    pub uplink: u64,
    pub downlink: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub accepted: usize,
    pub rejected: usize,
}

type RecordKey = (NodeId, String, u64);

/// Stores reported counters keyed by (node, tag, window).
///
/// A report replaces whatever was stored for its key, so a retried delivery
/// of the same window leaves the totals unchanged.
pub struct StatsAggregator {
    records: DashMap<RecordKey, TrafficCounters>,
    window_secs: AtomicU64,
    retention_windows: AtomicU64,
}

impl StatsAggregator {
    pub fn new(window_secs: u64, retention_windows: u64) -> Self {
        Self {
            records: DashMap::new(),
            window_secs: AtomicU64::new(window_secs.max(1)),
            retention_windows: AtomicU64::new(retention_windows),
        }
    }

    pub fn set_windows(&self, window_secs: u64, retention_windows: u64) {
        self.window_secs.store(window_secs.max(1), Ordering::Relaxed);
        self.retention_windows
            .store(retention_windows, Ordering::Relaxed);
    }

    /// Server-side window id for reports that do not carry one.
    pub fn current_window(&self, now: u64) -> u64 {
        now / self.window_secs.load(Ordering::Relaxed)
    }

    /// Store `entries` for `window`. Each entry is parsed on its own; a
    /// malformed one is skipped and counted.
    pub fn merge(&self, node: NodeId, window: u64, entries: &[Value]) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for (index, raw) in entries.iter().enumerate() {
            match parse_entry(raw) {
                Ok(entry) => {
                    self.records.insert(
                        (node, entry.tag, window),
                        TrafficCounters {
                            uplink: entry.uplink,
                            downlink: entry.downlink,
                        },
                    );
                    outcome.accepted += 1;
                }
                Err(reason) => {
                    tracing::warn!(node_id = %node, window, index, reason = %reason, "Skipping malformed stats entry");
                    outcome.rejected += 1;
                }
            }
        }
        metrics::record_stats_entries(outcome.accepted, outcome.rejected);
        outcome
    }

    /// Every stored window for `node`, ordered by window then tag.
    pub fn records_for(&self, node: NodeId) -> Vec<WindowRecord> {
        let mut records: Vec<WindowRecord> = self
            .records
            .iter()
            .filter(|r| r.key().0 == node)
            .map(|r| {
                let (node_id, tag, window) = r.key().clone();
                WindowRecord {
                    node_id,
                    tag,
                    window,
                    uplink: r.value().uplink,
                    downlink: r.value().downlink,
                }
            })
            .collect();
        records.sort_by(|a, b| (a.window, &a.tag).cmp(&(b.window, &b.tag)));
        records
    }

    pub fn get(&self, node: NodeId, tag: &str, window: u64) -> Option<TrafficCounters> {
        self.records
            .get(&(node, tag.to_string(), window))
            .map(|r| *r.value())
    }

    /// Drop windows more than the retention count behind each node's newest window.
    ///
    /// Returns the number of records removed.
    pub fn prune(&self) -> usize {
        let retention = self.retention_windows.load(Ordering::Relaxed);
        let mut newest: HashMap<NodeId, u64> = HashMap::new();
        for r in self.records.iter() {
            let (node, _, window) = r.key();
            let slot = newest.entry(*node).or_insert(*window);
            *slot = (*slot).max(*window);
        }

        let before = self.records.len();
        self.records.retain(|(node, _, window), _| {
            newest
                .get(node)
                .map_or(true, |latest| window.saturating_add(retention) >= *latest)
        });
        before.saturating_sub(self.records.len())
    }

    /// Periodic pruning until shutdown.
    pub async fn run_pruner(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.prune();
                    if removed > 0 {
                        tracing::debug!(removed, at = unix_now(), "Pruned stats windows");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Stats pruner received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

fn parse_entry(raw: &Value) -> Result<StatsEntry, String> {
    let entry: StatsEntry = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;
    if entry.tag.trim().is_empty() {
        return Err("empty tag".to_string());
    }
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redelivery_does_not_double_count() {
        let stats = StatsAggregator::new(60, 10);
        let node = NodeId::new();
        let batch = vec![json!({ "tag": "in1", "uplink": 1000, "downlink": 2000 })];

        stats.merge(node, 7, &batch);
        stats.merge(node, 7, &batch);

        assert_eq!(
            stats.get(node, "in1", 7),
            Some(TrafficCounters { uplink: 1000, downlink: 2000 })
        );
        assert_eq!(stats.records_for(node).len(), 1);
    }

    #[test]
    fn test_malformed_entries_are_skipped_and_counted() {
        let stats = StatsAggregator::new(60, 10);
        let node = NodeId::new();
        let batch = vec![
            json!({ "tag": "in1", "uplink": 1, "downlink": 2 }),
            json!({ "tag": "in2", "uplink": -5, "downlink": 2 }),
            json!({ "uplink": 1, "downlink": 2 }),
            json!({ "tag": " ", "uplink": 1, "downlink": 2 }),
            json!("garbage"),
            json!({ "tag": "out1", "uplink": 3, "downlink": 4 }),
        ];
        let outcome = stats.merge(node, 1, &batch);
        assert_eq!(outcome, MergeOutcome { accepted: 2, rejected: 4 });
        assert_eq!(stats.records_for(node).len(), 2);
    }

    #[test]
    fn test_windows_are_kept_apart() {
        let stats = StatsAggregator::new(60, 10);
        let node = NodeId::new();
        stats.merge(node, 1, &[json!({ "tag": "in1", "uplink": 10, "downlink": 20 })]);
        stats.merge(node, 2, &[json!({ "tag": "in1", "uplink": 5, "downlink": 5 })]);

        let records = stats.records_for(node);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].window, 1);
        assert_eq!(records[1].uplink, 5);
        assert_eq!(stats.current_window(125), 2);
    }

    #[test]
    fn test_prune_keeps_recent_windows_per_node() {
        let stats = StatsAggregator::new(60, 2);
        let busy = NodeId::new();
        let quiet = NodeId::new();
        for window in 1..=5 {
            stats.merge(busy, window, &[json!({ "tag": "in1", "uplink": 1, "downlink": 1 })]);
        }
        stats.merge(quiet, 1, &[json!({ "tag": "in1", "uplink": 1, "downlink": 1 })]);

        assert_eq!(stats.prune(), 2);
        let windows: Vec<u64> = stats.records_for(busy).iter().map(|r| r.window).collect();
        assert_eq!(windows, vec![3, 4, 5]);
        assert_eq!(stats.records_for(quiet).len(), 1);
    }
}
