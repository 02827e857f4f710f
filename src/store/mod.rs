//! Structured config store interface.
//!
//! # Data Flow
//! ```text
//! CRUD layer (external) → MemoryStore mutators
//!     → ChangeHook::node_changed (cache invalidation)
//!
//! ConfigCache build → ConfigStore::snapshot(tenant, node)
//!     → NodeSnapshot (all rows, tenant-scoped, one read)
//!
//! Sync handler → node lookups + write-back of status / stats / last-seen
//! ```
//!
//! # Design Decisions
//! - The store is the source of truth; this crate only writes node runtime fields
//! - Every read used to build a document is scoped by tenant and node
//! - Status writes are compare-and-set so concurrent sweeps and heartbeats
//!   cannot clobber each other

pub mod memory;
pub mod seed;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::liveness::NodeStatus;
use crate::model::{HostInfo, Node, NodeId, NodeSnapshot, RuntimeStats, TenantId};

pub use memory::MemoryStore;
pub use seed::{load_seed, Seed};

/// Repository of structured records, shared by every control-plane instance.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn node(&self, id: NodeId) -> Result<Option<Node>, StoreError>;

    async fn node_by_key(&self, node_key: &str) -> Result<Option<Node>, StoreError>;

    /// Maps a bearer credential to exactly one node.
    async fn node_by_token(&self, token: &str) -> Result<Option<Node>, StoreError>;

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError>;

    /// Fails with `DuplicateKey` when the node key is already registered.
    async fn insert_node(&self, node: Node) -> Result<Node, StoreError>;

    async fn record_host(&self, id: NodeId, host: HostInfo) -> Result<Node, StoreError>;

    async fn record_heartbeat(
        &self,
        id: NodeId,
        stats: RuntimeStats,
        seen_at: u64,
    ) -> Result<Node, StoreError>;

    /// Sets `next` only if the stored status is still `expected`.
    async fn compare_and_set_status(
        &self,
        id: NodeId,
        expected: NodeStatus,
        next: NodeStatus,
    ) -> Result<bool, StoreError>;

    /// Sets `Offline` only if the node is still `Online` and its `last_seen`
    /// still equals `seen`. A heartbeat landing after the caller's read wins.
    async fn expire_if_unseen(&self, id: NodeId, seen: Option<u64>) -> Result<bool, StoreError>;

    /// All rows contributing to `node`, restricted to `tenant`.
    ///
    /// `None` when the node does not exist within that tenant.
    async fn snapshot(
        &self,
        tenant: &TenantId,
        node: NodeId,
    ) -> Result<Option<NodeSnapshot>, StoreError>;
}

/// Notified after every mutation that affects a node's compiled document.
#[async_trait]
pub trait ChangeHook: Send + Sync {
    async fn node_changed(&self, tenant: &TenantId, node: NodeId);
}
