//! Agent protocol operations and their admin counterparts.

use arc_swap::ArcSwap;
use std::sync::Arc;

use crate::cache::ConfigCache;
use crate::compiler::CompiledDocument;
use crate::config::SyncConfig;
use crate::error::{StoreError, SyncError, SyncResult};
use crate::liveness::{self, transition, LivenessEvent};
use crate::model::{unix_now, Node, NodeId, TenantId};
use crate::observability::metrics;
use crate::stats::{cumulative, StatsAggregator, UsageTotal, WindowRecord};
use crate::store::ConfigStore;
use crate::sync::token::generate_token;
use crate::sync::types::{
    HeartbeatRequest, HeartbeatResponse, RegisterRequest, RegisterResponse, StatsRequest,
    StatsResponse, SyncResponse,
};

/// Status writes retry this many times when a concurrent writer wins the CAS.
const STATUS_CAS_ATTEMPTS: usize = 3;

/// Entry point for every sync endpoint.
#[derive(Clone)]
pub struct SyncService {
    store: Arc<dyn ConfigStore>,
    cache: ConfigCache,
    stats: Arc<StatsAggregator>,
    settings: Arc<ArcSwap<SyncConfig>>,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        cache: ConfigCache,
        stats: Arc<StatsAggregator>,
        settings: Arc<ArcSwap<SyncConfig>>,
    ) -> Self {
        Self {
            store,
            cache,
            stats,
            settings,
        }
    }

    pub fn cache(&self) -> &ConfigCache {
        &self.cache
    }

    /// Swap in reloaded settings; later calls observe them.
    pub fn apply_settings(&self, settings: SyncConfig) {
        self.stats
            .set_windows(settings.stats_window_secs, settings.stats_retention_windows);
        self.settings.store(Arc::new(settings));
    }

    // --- Agent operations ---

    /// Upsert a node by key within the tenant the enrollment key admits.
    pub async fn register(
        &self,
        enrollment_key: &str,
        request: RegisterRequest,
    ) -> SyncResult<RegisterResponse> {
        let tenant = self
            .settings
            .load()
            .tenant_for_key(enrollment_key)
            .map(TenantId::new)
            .ok_or_else(|| {
                tracing::warn!(node_key = %request.node_key, "Registration with unknown enrollment key");
                SyncError::Unauthorized("unknown enrollment key".into())
            })?;
        if request.node_key.trim().is_empty() {
            return Err(SyncError::validation("register", "nodeKey must not be empty"));
        }

        let node = match self.store.node_by_key(&request.node_key).await? {
            Some(existing) => self.reregister(existing, &tenant, &request).await?,
            None => {
                let mut fresh =
                    Node::provision(tenant.clone(), request.node_key.clone(), generate_token());
                fresh.host = request.host_info();
                match self.store.insert_node(fresh).await {
                    Ok(node) => {
                        tracing::info!(
                            node_id = %node.id,
                            tenant_id = %tenant,
                            node_key = %node.node_key,
                            "Node provisioned"
                        );
                        node
                    }
                    // Lost a race with a concurrent registration of the same key.
                    Err(StoreError::DuplicateKey(_)) => {
                        let existing = self
                            .store
                            .node_by_key(&request.node_key)
                            .await?
                            .ok_or_else(|| SyncError::Store("node vanished during registration".into()))?;
                        self.reregister(existing, &tenant, &request).await?
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let document = self.cache.get(&tenant, node.id).await?;
        self.mark_delivered(&node, &document).await;

        Ok(RegisterResponse {
            node_id: node.id,
            token: node.token,
            config: document.body.clone(),
            config_version: document.version.clone(),
        })
    }

    async fn reregister(
        &self,
        existing: Node,
        tenant: &TenantId,
        request: &RegisterRequest,
    ) -> SyncResult<Node> {
        if &existing.tenant_id != tenant {
            tracing::warn!(
                node_id = %existing.id,
                tenant_id = %existing.tenant_id,
                requested_tenant = %tenant,
                "Node key already registered under another tenant"
            );
            return Err(SyncError::Unauthorized(
                "node key is registered to another tenant".into(),
            ));
        }
        let node = self.store.record_host(existing.id, request.host_info()).await?;
        tracing::info!(node_id = %node.id, tenant_id = %tenant, "Node re-registered");
        Ok(node)
    }

    /// Record liveness and runtime stats; report whether the agent should re-fetch.
    pub async fn heartbeat(
        &self,
        token: &str,
        request: HeartbeatRequest,
    ) -> SyncResult<HeartbeatResponse> {
        let node = self.authorize(token, request.node_id).await?;
        let node = self
            .store
            .record_heartbeat(node.id, request.runtime_stats(), unix_now())
            .await?;
        self.apply_event(&node, LivenessEvent::Heartbeat).await?;

        let document = self.cache.get(&node.tenant_id, node.id).await?;
        let needs_update = match self.cache.delivered(node.id).await {
            Ok(Some(delivered)) => delivered != document.version,
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(
                    node_id = %node.id,
                    tenant_id = %node.tenant_id,
                    error = %e,
                    "Delivered version unknown, asking agent to re-fetch"
                );
                true
            }
        };
        metrics::record_heartbeat(needs_update);

        Ok(HeartbeatResponse {
            config_version: document.version.clone(),
            needs_update,
            heartbeat_interval_secs: self.settings.load().heartbeat_interval_secs,
        })
    }

    /// The freshest document for the node. Maintenance nodes are served too.
    pub async fn fetch_config(
        &self,
        token: &str,
        node_id: NodeId,
    ) -> SyncResult<Arc<CompiledDocument>> {
        let node = self.authorize(token, node_id).await?;
        let document = self.cache.get(&node.tenant_id, node.id).await?;
        self.mark_delivered(&node, &document).await;
        Ok(document)
    }

    pub async fn report_stats(&self, token: &str, request: StatsRequest) -> SyncResult<StatsResponse> {
        let node = self.authorize(token, request.node_id).await?;
        let window = request
            .window
            .unwrap_or_else(|| self.stats.current_window(unix_now()));
        let outcome = self.stats.merge(node.id, window, &request.stats);
        if outcome.rejected > 0 {
            tracing::warn!(
                node_id = %node.id,
                tenant_id = %node.tenant_id,
                window,
                rejected = outcome.rejected,
                "Stats batch contained malformed entries"
            );
        }
        Ok(StatsResponse {
            success: true,
            window,
            accepted: outcome.accepted,
            rejected: outcome.rejected,
        })
    }

    // --- Admin operations ---

    /// Invalidate and forget what was delivered, so the next heartbeat
    /// reports `needsUpdate` even if content is unchanged.
    pub async fn force_sync(&self, node_id: NodeId) -> SyncResult<SyncResponse> {
        let node = self.node(node_id).await?;
        self.cache.invalidate(&node.tenant_id, node.id).await?;
        self.cache.clear_delivered(node.id).await?;
        tracing::info!(node_id = %node.id, tenant_id = %node.tenant_id, "Forced config sync");
        Ok(SyncResponse {
            success: true,
            node_id: node.id,
            message: "config invalidated; node will re-fetch on next heartbeat".into(),
        })
    }

    pub async fn set_maintenance(&self, node_id: NodeId, enabled: bool) -> SyncResult<Node> {
        let node = self.node(node_id).await?;
        let event = if enabled {
            LivenessEvent::EnterMaintenance
        } else {
            LivenessEvent::ExitMaintenance
        };
        self.apply_event(&node, event).await?;
        self.node(node_id).await
    }

    /// Online nodes of `tenant`.
    pub async fn dispatchable_nodes(&self, tenant: &TenantId) -> SyncResult<Vec<Node>> {
        Ok(liveness::dispatchable_nodes(self.store.as_ref(), tenant).await?)
    }

    pub async fn nodes(&self) -> SyncResult<Vec<Node>> {
        Ok(self.store.list_nodes().await?)
    }

    pub async fn node(&self, node_id: NodeId) -> SyncResult<Node> {
        self.store
            .node(node_id)
            .await?
            .ok_or(SyncError::NotFound(node_id))
    }

    /// Stored windows for a node and their per-tag totals.
    pub async fn usage(&self, node_id: NodeId) -> SyncResult<(Vec<WindowRecord>, Vec<UsageTotal>)> {
        let node = self.node(node_id).await?;
        let records = self.stats.records_for(node.id);
        let totals = cumulative(&records);
        Ok((records, totals))
    }

    // --- Internals ---

    /// Resolve the bearer credential and require it to belong to `node_id`.
    async fn authorize(&self, token: &str, node_id: NodeId) -> SyncResult<Node> {
        let Some(node) = self.store.node_by_token(token).await? else {
            tracing::warn!(node_id = %node_id, "Unknown or revoked node credential");
            return Err(SyncError::Unauthorized(
                "unknown or revoked node credential".into(),
            ));
        };
        if node.id != node_id {
            tracing::warn!(
                node_id = %node_id,
                token_node_id = %node.id,
                tenant_id = %node.tenant_id,
                "Credential does not belong to requested node"
            );
            return Err(SyncError::Unauthorized(
                "credential does not belong to this node".into(),
            ));
        }
        Ok(node)
    }

    /// Apply a liveness event through compare-and-set, re-reading on conflict.
    async fn apply_event(&self, node: &Node, event: LivenessEvent) -> SyncResult<()> {
        let mut current = node.status;
        for _ in 0..STATUS_CAS_ATTEMPTS {
            let next = transition(current, event);
            if next == current {
                return Ok(());
            }
            if self.store.compare_and_set_status(node.id, current, next).await? {
                metrics::record_transition(current, next);
                tracing::info!(
                    node_id = %node.id,
                    tenant_id = %node.tenant_id,
                    from = %current,
                    to = %next,
                    "Node status changed"
                );
                return Ok(());
            }
            current = self.node(node.id).await?.status;
        }
        tracing::warn!(node_id = %node.id, tenant_id = %node.tenant_id, ?event, "Status kept changing underneath; giving up");
        Ok(())
    }

    async fn mark_delivered(&self, node: &Node, document: &CompiledDocument) {
        if let Err(e) = self.cache.mark_delivered(node.id, &document.version).await {
            tracing::warn!(
                node_id = %node.id,
                tenant_id = %node.tenant_id,
                error = %e,
                "Failed to record delivered config version"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InvalidationTrigger, MemoryCacheStore};
    use crate::config::EnrollmentKey;
    use crate::liveness::NodeStatus;
    use crate::model::{EntityId, Outbound};
    use crate::store::{ChangeHook, MemoryStore};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        store: Arc<MemoryStore>,
        cache_store: Arc<MemoryCacheStore>,
        sync: SyncService,
        _hook: Arc<dyn ChangeHook>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let cache_store = Arc::new(MemoryCacheStore::new());
        let cache = ConfigCache::new(store.clone(), cache_store.clone(), Duration::from_secs(5));
        let hook: Arc<dyn ChangeHook> = Arc::new(InvalidationTrigger::new(cache.clone()));
        store.set_hook(&hook);

        let settings = SyncConfig {
            enrollment_keys: vec![
                EnrollmentKey { key: "enroll-a".into(), tenant_id: "tenant-a".into() },
                EnrollmentKey { key: "enroll-b".into(), tenant_id: "tenant-b".into() },
            ],
            ..Default::default()
        };
        let sync = SyncService::new(
            store.clone(),
            cache,
            Arc::new(StatsAggregator::new(60, 10)),
            Arc::new(ArcSwap::from_pointee(settings)),
        );
        Harness {
            store,
            cache_store,
            sync,
            _hook: hook,
        }
    }

    fn register_request(key: &str) -> RegisterRequest {
        RegisterRequest {
            node_key: key.into(),
            hostname: Some("edge-1.example".into()),
            public_ip: None,
            version: Some("1.2.3".into()),
        }
    }

    fn heartbeat_request(node_id: NodeId) -> HeartbeatRequest {
        serde_json::from_value(json!({ "nodeId": node_id, "running": true })).unwrap()
    }

    #[tokio::test]
    async fn test_register_is_idempotent_by_key() {
        let h = harness();
        let first = h.sync.register("enroll-a", register_request("edge-1")).await.unwrap();
        let second = h.sync.register("enroll-a", register_request("edge-1")).await.unwrap();

        assert_eq!(first.node_id, second.node_id);
        assert_eq!(first.token, second.token);
        assert_eq!(first.config_version, second.config_version);
        assert_eq!(h.sync.nodes().await.unwrap().len(), 1);
        assert!(first.config["inbounds"].is_array());
    }

    #[tokio::test]
    async fn test_register_rejects_bad_enrollment() {
        let h = harness();
        let err = h.sync.register("nope", register_request("edge-1")).await.unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized(_)));

        h.sync.register("enroll-a", register_request("edge-1")).await.unwrap();
        let err = h.sync.register("enroll-b", register_request("edge-1")).await.unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_heartbeat_needs_update_only_after_change() {
        let h = harness();
        let reg = h.sync.register("enroll-a", register_request("edge-1")).await.unwrap();
        let node = h.sync.node(reg.node_id).await.unwrap();

        let first = h.sync.heartbeat(&reg.token, heartbeat_request(reg.node_id)).await.unwrap();
        let second = h.sync.heartbeat(&reg.token, heartbeat_request(reg.node_id)).await.unwrap();
        assert!(!first.needs_update);
        assert!(!second.needs_update);
        assert_eq!(first.heartbeat_interval_secs, 30);

        h.store
            .upsert_outbound(Outbound {
                id: EntityId::new(),
                tenant_id: node.tenant_id.clone(),
                node_id: node.id,
                tag: "exit-1".into(),
                protocol: "freedom".into(),
                settings: None,
                transport: Default::default(),
                security: Default::default(),
                stream_settings: None,
                priority: 0,
                enabled: true,
            })
            .await;
        h.sync.force_sync(node.id).await.unwrap();

        let third = h.sync.heartbeat(&reg.token, heartbeat_request(reg.node_id)).await.unwrap();
        assert!(third.needs_update);
        assert_ne!(third.config_version, first.config_version);

        let fetched = h.sync.fetch_config(&reg.token, reg.node_id).await.unwrap();
        assert_eq!(fetched.version, third.config_version);
        let fourth = h.sync.heartbeat(&reg.token, heartbeat_request(reg.node_id)).await.unwrap();
        assert!(!fourth.needs_update);
    }

    #[tokio::test]
    async fn test_force_sync_without_change_still_requests_fetch() {
        let h = harness();
        let reg = h.sync.register("enroll-a", register_request("edge-1")).await.unwrap();
        h.sync.force_sync(reg.node_id).await.unwrap();
        let beat = h.sync.heartbeat(&reg.token, heartbeat_request(reg.node_id)).await.unwrap();
        assert!(beat.needs_update);
        assert_eq!(beat.config_version, reg.config_version);
    }

    #[tokio::test]
    async fn test_heartbeat_brings_node_online() {
        let h = harness();
        let reg = h.sync.register("enroll-a", register_request("edge-1")).await.unwrap();
        assert_eq!(h.sync.node(reg.node_id).await.unwrap().status, NodeStatus::Offline);

        h.sync.heartbeat(&reg.token, heartbeat_request(reg.node_id)).await.unwrap();
        let node = h.sync.node(reg.node_id).await.unwrap();
        assert_eq!(node.status, NodeStatus::Online);
        assert!(node.last_seen.is_some());
        assert!(node.runtime.unwrap().running);
    }

    #[tokio::test]
    async fn test_maintenance_survives_heartbeats_and_still_serves_config() {
        let h = harness();
        let reg = h.sync.register("enroll-a", register_request("edge-1")).await.unwrap();
        h.sync.heartbeat(&reg.token, heartbeat_request(reg.node_id)).await.unwrap();

        let node = h.sync.set_maintenance(reg.node_id, true).await.unwrap();
        assert_eq!(node.status, NodeStatus::Maintenance);
        h.sync.heartbeat(&reg.token, heartbeat_request(reg.node_id)).await.unwrap();
        assert_eq!(h.sync.node(reg.node_id).await.unwrap().status, NodeStatus::Maintenance);
        assert!(h.sync.fetch_config(&reg.token, reg.node_id).await.is_ok());
        assert!(h.sync.dispatchable_nodes(&TenantId::new("tenant-a")).await.unwrap().is_empty());

        let node = h.sync.set_maintenance(reg.node_id, false).await.unwrap();
        assert_eq!(node.status, NodeStatus::Offline);
    }

    #[tokio::test]
    async fn test_agent_calls_require_matching_credential() {
        let h = harness();
        let a = h.sync.register("enroll-a", register_request("edge-a")).await.unwrap();
        let b = h.sync.register("enroll-b", register_request("edge-b")).await.unwrap();

        let err = h.sync.fetch_config("bogus", a.node_id).await.unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized(_)));
        let err = h.sync.fetch_config(&b.token, a.node_id).await.unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized(_)));
        let err = h.sync.heartbeat(&a.token, heartbeat_request(NodeId::new())).await.unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_stats_retry_is_not_double_counted() {
        let h = harness();
        let reg = h.sync.register("enroll-a", register_request("edge-1")).await.unwrap();
        let request = StatsRequest {
            node_id: reg.node_id,
            window: Some(42),
            stats: vec![
                json!({ "tag": "in1", "uplink": 1000, "downlink": 2000 }),
                json!({ "tag": "in2" }),
            ],
        };
        let first = h.sync.report_stats(&reg.token, request.clone()).await.unwrap();
        h.sync.report_stats(&reg.token, request).await.unwrap();
        assert_eq!((first.accepted, first.rejected), (1, 1));

        let (records, totals) = h.sync.usage(reg.node_id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!((totals[0].uplink, totals[0].downlink), (1000, 2000));
    }

    #[tokio::test]
    async fn test_heartbeat_during_cache_outage_requests_fetch() {
        let h = harness();
        let reg = h.sync.register("enroll-a", register_request("edge-1")).await.unwrap();
        h.cache_store.set_available(false);

        let beat = h.sync.heartbeat(&reg.token, heartbeat_request(reg.node_id)).await.unwrap();
        assert!(beat.needs_update);
        assert_eq!(beat.config_version, reg.config_version);
        assert!(h.sync.fetch_config(&reg.token, reg.node_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_node_admin_calls() {
        let h = harness();
        let missing = NodeId::new();
        assert!(matches!(h.sync.force_sync(missing).await, Err(SyncError::NotFound(_))));
        assert!(matches!(h.sync.set_maintenance(missing, true).await, Err(SyncError::NotFound(_))));
        assert!(matches!(h.sync.usage(missing).await, Err(SyncError::NotFound(_))));
    }
}
