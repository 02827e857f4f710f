//! Node records and agent-reported host data.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::liveness::NodeStatus;
use crate::model::ids::{NodeId, TenantId};

/// One remote proxy-core instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub tenant_id: TenantId,
    /// Stable agent-chosen key used for upsert-by-key registration.
    pub node_key: String,
    /// Bearer credential for every agent call except register.
    #[serde(skip_serializing)]
    pub token: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub status: NodeStatus,
    /// Seconds since epoch of the last accepted heartbeat.
    #[serde(default)]
    pub last_seen: Option<u64>,
    #[serde(default)]
    pub host: HostInfo,
    #[serde(default)]
    pub runtime: Option<RuntimeStats>,
    /// Free-form document layered on top of the compiled output.
    #[serde(default)]
    pub config_overrides: Option<serde_json::Value>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Node {
    /// A freshly provisioned node; starts offline until its first heartbeat.
    pub fn provision(tenant_id: TenantId, node_key: impl Into<String>, token: String) -> Self {
        Self {
            id: NodeId::new(),
            tenant_id,
            node_key: node_key.into(),
            token,
            group_id: None,
            status: NodeStatus::Offline,
            last_seen: None,
            host: HostInfo::default(),
            runtime: None,
            config_overrides: None,
            tags: BTreeSet::new(),
        }
    }
}

/// Host metadata supplied at registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostInfo {
    pub hostname: Option<String>,
    pub public_ip: Option<String>,
    pub agent_version: Option<String>,
}

/// Runtime metrics carried by each heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeStats {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
    pub network_in: u64,
    pub network_out: u64,
    pub active_connections: u64,
    pub running: bool,
    pub uptime_secs: Option<u64>,
    pub online_users: Option<u64>,
}
