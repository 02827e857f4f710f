//! In-process `ConfigStore` with CRUD mutators.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock, Weak};

use crate::error::StoreError;
use crate::liveness::NodeStatus;
use crate::model::{
    Balancer, Client, DocumentKind, EntityId, HostInfo, Inbound, Node, NodeDocument, NodeId,
    NodeSnapshot, Outbound, RuntimeStats, TenantId,
};
use crate::store::seed::Seed;
use crate::store::{ChangeHook, ConfigStore};

#[derive(Default)]
struct Tables {
    nodes: HashMap<NodeId, Node>,
    inbounds: HashMap<EntityId, Inbound>,
    outbounds: HashMap<EntityId, Outbound>,
    balancers: HashMap<EntityId, Balancer>,
    clients: HashMap<EntityId, Client>,
    documents: HashMap<(NodeId, DocumentKind), NodeDocument>,
}

/// Table store held in memory.
///
/// Mutators report affected nodes to the registered `ChangeHook`. The hook is
/// held weakly because it usually owns the cache that owns this store.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    hook: OnceLock<Weak<dyn ChangeHook>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated from a seed fixture. No hook fires.
    pub fn from_seed(seed: Seed) -> Self {
        let store = Self::new();
        {
            let mut t = store.write();
            for node in seed.nodes {
                t.nodes.insert(node.id, node);
            }
            for row in seed.inbounds {
                t.inbounds.insert(row.id, row);
            }
            for row in seed.outbounds {
                t.outbounds.insert(row.id, row);
            }
            for row in seed.balancers {
                t.balancers.insert(row.id, row);
            }
            for row in seed.clients {
                t.clients.insert(row.id, row);
            }
            for doc in seed.documents {
                t.documents.insert((doc.node_id, doc.kind), doc);
            }
        }
        store
    }

    /// Register the mutation hook. Only the first registration sticks.
    pub fn set_hook(&self, hook: &Arc<dyn ChangeHook>) {
        if self.hook.set(Arc::downgrade(hook)).is_err() {
            tracing::warn!("Change hook already registered; ignoring");
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().expect("store lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().expect("store lock poisoned")
    }

    async fn notify(&self, changed: Vec<(TenantId, NodeId)>) {
        let Some(hook) = self.hook.get().and_then(Weak::upgrade) else {
            return;
        };
        let mut seen = Vec::with_capacity(changed.len());
        for (tenant, node) in changed {
            if seen.contains(&node) {
                continue;
            }
            seen.push(node);
            hook.node_changed(&tenant, node).await;
        }
    }

    // --- Mutators used by the CRUD layer ---

    pub async fn upsert_inbound(&self, row: Inbound) {
        let mut changed = vec![(row.tenant_id.clone(), row.node_id)];
        if let Some(prev) = self.write().inbounds.insert(row.id, row) {
            changed.push((prev.tenant_id, prev.node_id));
        }
        self.notify(changed).await;
    }

    pub async fn delete_inbound(&self, id: EntityId) -> bool {
        let removed = self.write().inbounds.remove(&id);
        match removed {
            Some(row) => {
                self.notify(vec![(row.tenant_id, row.node_id)]).await;
                true
            }
            None => false,
        }
    }

    pub async fn upsert_outbound(&self, row: Outbound) {
        let mut changed = vec![(row.tenant_id.clone(), row.node_id)];
        if let Some(prev) = self.write().outbounds.insert(row.id, row) {
            changed.push((prev.tenant_id, prev.node_id));
        }
        self.notify(changed).await;
    }

    pub async fn delete_outbound(&self, id: EntityId) -> bool {
        let removed = self.write().outbounds.remove(&id);
        match removed {
            Some(row) => {
                self.notify(vec![(row.tenant_id, row.node_id)]).await;
                true
            }
            None => false,
        }
    }

    pub async fn upsert_balancer(&self, row: Balancer) {
        let mut changed = vec![(row.tenant_id.clone(), row.node_id)];
        if let Some(prev) = self.write().balancers.insert(row.id, row) {
            changed.push((prev.tenant_id, prev.node_id));
        }
        self.notify(changed).await;
    }

    pub async fn delete_balancer(&self, id: EntityId) -> bool {
        let removed = self.write().balancers.remove(&id);
        match removed {
            Some(row) => {
                self.notify(vec![(row.tenant_id, row.node_id)]).await;
                true
            }
            None => false,
        }
    }

    pub async fn upsert_client(&self, row: Client) {
        let mut changed = vec![(row.tenant_id.clone(), row.node_id)];
        if let Some(prev) = self.write().clients.insert(row.id, row) {
            changed.push((prev.tenant_id, prev.node_id));
        }
        self.notify(changed).await;
    }

    pub async fn delete_client(&self, id: EntityId) -> bool {
        let removed = self.write().clients.remove(&id);
        match removed {
            Some(row) => {
                self.notify(vec![(row.tenant_id, row.node_id)]).await;
                true
            }
            None => false,
        }
    }

    pub async fn put_document(&self, doc: NodeDocument) {
        let changed = vec![(doc.tenant_id.clone(), doc.node_id)];
        self.write().documents.insert((doc.node_id, doc.kind), doc);
        self.notify(changed).await;
    }

    pub async fn delete_document(&self, node: NodeId, kind: DocumentKind) -> bool {
        let removed = self.write().documents.remove(&(node, kind));
        match removed {
            Some(doc) => {
                self.notify(vec![(doc.tenant_id, doc.node_id)]).await;
                true
            }
            None => false,
        }
    }

    pub async fn set_node_overrides(
        &self,
        id: NodeId,
        overrides: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        let tenant = {
            let mut t = self.write();
            let node = t.nodes.get_mut(&id).ok_or(StoreError::NodeNotFound(id))?;
            node.config_overrides = overrides;
            node.tenant_id.clone()
        };
        self.notify(vec![(tenant, id)]).await;
        Ok(())
    }

    fn modify_node<F>(&self, id: NodeId, f: F) -> Result<Node, StoreError>
    where
        F: FnOnce(&mut Node),
    {
        let mut t = self.write();
        let node = t.nodes.get_mut(&id).ok_or(StoreError::NodeNotFound(id))?;
        f(node);
        Ok(node.clone())
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn node(&self, id: NodeId) -> Result<Option<Node>, StoreError> {
        Ok(self.read().nodes.get(&id).cloned())
    }

    async fn node_by_key(&self, node_key: &str) -> Result<Option<Node>, StoreError> {
        Ok(self
            .read()
            .nodes
            .values()
            .find(|n| n.node_key == node_key)
            .cloned())
    }

    async fn node_by_token(&self, token: &str) -> Result<Option<Node>, StoreError> {
        if token.is_empty() {
            return Ok(None);
        }
        Ok(self.read().nodes.values().find(|n| n.token == token).cloned())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        let mut nodes: Vec<Node> = self.read().nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.node_key.cmp(&b.node_key));
        Ok(nodes)
    }

    async fn insert_node(&self, node: Node) -> Result<Node, StoreError> {
        let mut t = self.write();
        if t.nodes.values().any(|n| n.node_key == node.node_key) {
            return Err(StoreError::DuplicateKey(node.node_key));
        }
        t.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    async fn record_host(&self, id: NodeId, host: HostInfo) -> Result<Node, StoreError> {
        self.modify_node(id, |node| node.host = host)
    }

    async fn record_heartbeat(
        &self,
        id: NodeId,
        stats: RuntimeStats,
        seen_at: u64,
    ) -> Result<Node, StoreError> {
        self.modify_node(id, |node| {
            node.runtime = Some(stats);
            node.last_seen = Some(node.last_seen.map_or(seen_at, |prev| prev.max(seen_at)));
        })
    }

    async fn compare_and_set_status(
        &self,
        id: NodeId,
        expected: NodeStatus,
        next: NodeStatus,
    ) -> Result<bool, StoreError> {
        let mut t = self.write();
        let node = t.nodes.get_mut(&id).ok_or(StoreError::NodeNotFound(id))?;
        if node.status != expected {
            return Ok(false);
        }
        node.status = next;
        Ok(true)
    }

    async fn expire_if_unseen(&self, id: NodeId, seen: Option<u64>) -> Result<bool, StoreError> {
        let mut t = self.write();
        let node = t.nodes.get_mut(&id).ok_or(StoreError::NodeNotFound(id))?;
        if node.status != NodeStatus::Online || node.last_seen != seen {
            return Ok(false);
        }
        node.status = NodeStatus::Offline;
        Ok(true)
    }

    async fn snapshot(
        &self,
        tenant: &TenantId,
        node: NodeId,
    ) -> Result<Option<NodeSnapshot>, StoreError> {
        let t = self.read();
        let Some(row) = t.nodes.get(&node).filter(|n| &n.tenant_id == tenant) else {
            return Ok(None);
        };
        let scoped = |t_id: &TenantId, n_id: &NodeId| t_id == tenant && *n_id == node;

        Ok(Some(NodeSnapshot {
            node: row.clone(),
            inbounds: t
                .inbounds
                .values()
                .filter(|r| scoped(&r.tenant_id, &r.node_id))
                .cloned()
                .collect(),
            outbounds: t
                .outbounds
                .values()
                .filter(|r| scoped(&r.tenant_id, &r.node_id))
                .cloned()
                .collect(),
            balancers: t
                .balancers
                .values()
                .filter(|r| scoped(&r.tenant_id, &r.node_id))
                .cloned()
                .collect(),
            documents: t
                .documents
                .values()
                .filter(|r| scoped(&r.tenant_id, &r.node_id))
                .cloned()
                .collect(),
            clients: t
                .clients
                .values()
                .filter(|r| scoped(&r.tenant_id, &r.node_id))
                .cloned()
                .collect(),
        }))
    }
}
