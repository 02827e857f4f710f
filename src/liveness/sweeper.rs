//! Heartbeat-timeout sweep.

use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::SyncConfig;
use crate::error::StoreError;
use crate::liveness::state::{is_expired, transition, LivenessEvent, NodeStatus};
use crate::model::{unix_now, Node, TenantId};
use crate::observability::metrics;
use crate::store::ConfigStore;

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub expired: usize,
    pub online: usize,
    pub offline: usize,
    pub maintenance: usize,
}

/// Moves online nodes whose heartbeat has lapsed to offline.
pub struct LivenessSweeper {
    store: Arc<dyn ConfigStore>,
    settings: Arc<ArcSwap<SyncConfig>>,
}

impl LivenessSweeper {
    pub fn new(store: Arc<dyn ConfigStore>, settings: Arc<ArcSwap<SyncConfig>>) -> Self {
        Self { store, settings }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval_secs = self.settings.load().sweep_interval_secs;
        tracing::info!(
            interval = interval_secs,
            timeout = self.settings.load().heartbeat_timeout_secs,
            "Liveness sweeper starting"
        );

        let mut ticker = time::interval(Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once(unix_now()).await {
                        tracing::error!(error = %e, "Liveness sweep failed");
                    }
                    let configured = self.settings.load().sweep_interval_secs;
                    if configured != interval_secs {
                        tracing::info!(from = interval_secs, to = configured, "Sweep interval changed");
                        interval_secs = configured;
                        ticker = time::interval(Duration::from_secs(interval_secs));
                        ticker.tick().await;
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Liveness sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// One pass over every node as of `now`. Safe to run concurrently with
    /// itself and with heartbeats: a node is only expired if neither its
    /// status nor its `last_seen` moved since the listing.
    pub async fn sweep_once(&self, now: u64) -> Result<SweepReport, StoreError> {
        let timeout = self.settings.load().heartbeat_timeout_secs;
        let nodes = self.store.list_nodes().await?;
        let mut report = SweepReport {
            checked: nodes.len(),
            ..Default::default()
        };

        for node in nodes {
            let mut status = node.status;
            if status == NodeStatus::Online && is_expired(node.last_seen, now, timeout) {
                let next = transition(status, LivenessEvent::Timeout);
                if self.store.expire_if_unseen(node.id, node.last_seen).await? {
                    metrics::record_transition(status, next);
                    tracing::info!(
                        node_id = %node.id,
                        tenant_id = %node.tenant_id,
                        last_seen = ?node.last_seen,
                        "Node heartbeat lapsed, marking offline"
                    );
                    report.expired += 1;
                    status = next;
                }
            }
            match status {
                NodeStatus::Online => report.online += 1,
                NodeStatus::Offline => report.offline += 1,
                NodeStatus::Maintenance => report.maintenance += 1,
            }
        }

        metrics::record_node_counts(report.online, report.offline, report.maintenance);
        Ok(report)
    }
}

/// Nodes of `tenant` that may receive new client traffic: online only.
pub async fn dispatchable_nodes(
    store: &dyn ConfigStore,
    tenant: &TenantId,
) -> Result<Vec<Node>, StoreError> {
    Ok(store
        .list_nodes()
        .await?
        .into_iter()
        .filter(|n| &n.tenant_id == tenant && n.status == NodeStatus::Online)
        .collect())
}
