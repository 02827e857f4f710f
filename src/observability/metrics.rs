//! Metrics collection and exposition.
//!
//! # Metrics
//! - `fleet_compile_total` (counter): builds by outcome (`clean`, `issues`, `failed`)
//! - `fleet_compile_duration_seconds` (histogram): build latency
//! - `fleet_compile_issues_total` (counter): per-entity issues by kind
//! - `fleet_cache_lookups_total` (counter): `hit`, `miss`, `joined`, `fallback`
//! - `fleet_invalidations_total` (counter): generation bumps
//! - `fleet_heartbeats_total` (counter): by `needs_update`
//! - `fleet_stats_entries_total` (counter): `accepted` / `rejected`
//! - `fleet_node_transitions_total` (counter): liveness edges by `from`, `to`
//! - `fleet_nodes` (gauge): node count by status
//!
//! When no recorder is installed every call here is a no-op.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::SyncError;
use crate::liveness::NodeStatus;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_compile(duration: Duration, issues: &[SyncError]) {
    let outcome = if issues.is_empty() { "clean" } else { "issues" };
    metrics::counter!("fleet_compile_total", "outcome" => outcome).increment(1);
    metrics::histogram!("fleet_compile_duration_seconds").record(duration.as_secs_f64());
    for issue in issues {
        metrics::counter!("fleet_compile_issues_total", "kind" => issue.code()).increment(1);
    }
}

pub fn record_compile_failure() {
    metrics::counter!("fleet_compile_total", "outcome" => "failed").increment(1);
}

pub fn record_cache_lookup(result: &'static str) {
    metrics::counter!("fleet_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_invalidation() {
    metrics::counter!("fleet_invalidations_total").increment(1);
}

pub fn record_heartbeat(needs_update: bool) {
    let label = if needs_update { "true" } else { "false" };
    metrics::counter!("fleet_heartbeats_total", "needs_update" => label).increment(1);
}

pub fn record_stats_entries(accepted: usize, rejected: usize) {
    metrics::counter!("fleet_stats_entries_total", "result" => "accepted").increment(accepted as u64);
    metrics::counter!("fleet_stats_entries_total", "result" => "rejected").increment(rejected as u64);
}

pub fn record_transition(from: NodeStatus, to: NodeStatus) {
    metrics::counter!(
        "fleet_node_transitions_total",
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

pub fn record_node_counts(online: usize, offline: usize, maintenance: usize) {
    metrics::gauge!("fleet_nodes", "status" => "online").set(online as f64);
    metrics::gauge!("fleet_nodes", "status" => "offline").set(offline as f64);
    metrics::gauge!("fleet_nodes", "status" => "maintenance").set(maintenance as f64);
}
