//! Store mutation → cache invalidation.

use async_trait::async_trait;

use crate::cache::config_cache::ConfigCache;
use crate::model::{NodeId, TenantId};
use crate::store::ChangeHook;

/// Invalidates a node's cached document whenever the store reports a
/// mutation touching it.
pub struct InvalidationTrigger {
    cache: ConfigCache,
}

impl InvalidationTrigger {
    pub fn new(cache: ConfigCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ChangeHook for InvalidationTrigger {
    async fn node_changed(&self, tenant: &TenantId, node: NodeId) {
        // On failure the cache logs and defers the invalidation.
        let _ = self.cache.invalidate(tenant, node).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryCacheStore;
    use crate::model::{EntityId, Inbound, Node};
    use crate::store::{ConfigStore, MemoryStore};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_store_mutation_invalidates_cached_document() {
        let store = Arc::new(MemoryStore::new());
        let node = store
            .insert_node(Node::provision(TenantId::new("t1"), "edge-1", "tok".into()))
            .await
            .unwrap();
        let cache = ConfigCache::new(
            store.clone(),
            Arc::new(MemoryCacheStore::new()),
            Duration::from_secs(5),
        );
        let hook: Arc<dyn ChangeHook> = Arc::new(InvalidationTrigger::new(cache.clone()));
        store.set_hook(&hook);

        let before = cache.get(&node.tenant_id, node.id).await.unwrap();
        store
            .upsert_inbound(Inbound {
                id: EntityId::new(),
                tenant_id: node.tenant_id.clone(),
                node_id: node.id,
                tag: "in1".into(),
                protocol: "trojan".into(),
                port: 8443,
                listen: None,
                settings: None,
                transport: Default::default(),
                security: Default::default(),
                sniffing: Default::default(),
                stream_settings: None,
                enabled: true,
                sort_order: 0,
            })
            .await;

        let after = cache.get(&node.tenant_id, node.id).await.unwrap();
        assert_ne!(before.version, after.version);
        assert_eq!(cache.builds(), 2);
    }

    #[tokio::test]
    async fn test_mutation_during_cache_outage_is_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let node = store
            .insert_node(Node::provision(TenantId::new("t1"), "edge-1", "tok".into()))
            .await
            .unwrap();
        let cache_store = Arc::new(MemoryCacheStore::new());
        let cache = ConfigCache::new(store.clone(), cache_store.clone(), Duration::from_secs(5));
        let hook: Arc<dyn ChangeHook> = Arc::new(InvalidationTrigger::new(cache.clone()));
        store.set_hook(&hook);

        let before = cache.get(&node.tenant_id, node.id).await.unwrap();
        cache_store.set_available(false);
        store
            .set_node_overrides(node.id, Some(serde_json::json!({ "log": { "loglevel": "debug" } })))
            .await
            .unwrap();
        cache_store.set_available(true);

        let after = cache.get(&node.tenant_id, node.id).await.unwrap();
        assert_ne!(before.version, after.version);
        assert_eq!(after.body["log"]["loglevel"], "debug");
    }
}
