//! Structured configuration records.
//!
//! # Ownership
//! ```text
//! Tenant ─┬─ Node ─┬─ Inbound ─── (tag) ◀── Client.inbound_tags
//!         │        ├─ Outbound ── (tag) ◀── Balancer.selector / Client.outbound_tag
//!         │        ├─ Balancer
//!         │        └─ NodeDocument (routing / dns / policy)
//!         └─ ...
//! ```
//!
//! All rows are owned by the structured config store. The core reads them as
//! a `NodeSnapshot` and only writes back node status, runtime stats and
//! last-seen fields.

pub mod entities;
pub mod ids;
pub mod node;
pub mod snapshot;

pub use entities::{
    Balancer, BalancerStrategy, Client, DocumentKind, Inbound, Network, NodeDocument, Outbound,
    SecurityKind, SecuritySettings, SniffingSettings, TransportSettings,
};
pub use ids::{EntityId, NodeId, TenantId};
pub use node::{HostInfo, Node, RuntimeStats};
pub use snapshot::NodeSnapshot;

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
