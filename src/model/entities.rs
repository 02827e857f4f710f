//! Inbound, outbound, balancer, client and free-form node documents.
//!
//! Transport and security are stored as structured columns. Older rows may
//! also carry a `stream_settings` blob written by earlier tooling; the
//! compiler decides which representation wins (see `compiler::stream`).

use serde::{Deserialize, Serialize};

use crate::model::ids::{EntityId, NodeId, TenantId};

/// Transport network type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Tcp,
    Ws,
    Grpc,
    H2,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Ws => "ws",
            Network::Grpc => "grpc",
            Network::H2 => "h2",
        }
    }
}

/// Transport columns. Sub-fields only apply to their own network type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub network: Network,
    pub tcp_header_type: Option<String>,
    pub ws_path: Option<String>,
    pub ws_host: Option<String>,
    pub grpc_service_name: Option<String>,
    pub h2_path: Option<String>,
    pub h2_hosts: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityKind {
    #[default]
    None,
    Tls,
    Reality,
}

impl SecurityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityKind::None => "none",
            SecurityKind::Tls => "tls",
            SecurityKind::Reality => "reality",
        }
    }
}

/// Security columns for TLS and REALITY.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    pub kind: SecurityKind,
    pub server_name: Option<String>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub alpn: Vec<String>,
    pub fingerprint: Option<String>,
    pub reality_dest: Option<String>,
    pub reality_server_names: Vec<String>,
    pub reality_private_key: Option<String>,
    pub reality_public_key: Option<String>,
    pub reality_short_ids: Vec<String>,
}

/// Traffic sniffing columns (inbounds only).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SniffingSettings {
    pub enabled: bool,
    pub dest_override: Vec<String>,
    pub route_only: bool,
}

/// A listener bound to exactly one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inbound {
    #[serde(default)]
    pub id: EntityId,
    pub tenant_id: TenantId,
    pub node_id: NodeId,
    pub tag: String,
    pub protocol: String,
    pub port: u16,
    #[serde(default)]
    pub listen: Option<String>,
    /// Protocol-specific settings; the compiled client list is injected here.
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub sniffing: SniffingSettings,
    /// Legacy free-form stream settings.
    #[serde(default)]
    pub stream_settings: Option<serde_json::Value>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub sort_order: i32,
}

/// An egress rule bound to one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outbound {
    #[serde(default)]
    pub id: EntityId,
    pub tenant_id: TenantId,
    pub node_id: NodeId,
    pub tag: String,
    pub protocol: String,
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub stream_settings: Option<serde_json::Value>,
    /// Higher priority is emitted first; the first outbound is the default route.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BalancerStrategy {
    #[default]
    Random,
    RoundRobin,
    LeastPing,
    LeastLoad,
}

impl BalancerStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalancerStrategy::Random => "random",
            BalancerStrategy::RoundRobin => "roundRobin",
            BalancerStrategy::LeastPing => "leastPing",
            BalancerStrategy::LeastLoad => "leastLoad",
        }
    }
}

/// Named group of outbound tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balancer {
    #[serde(default)]
    pub id: EntityId,
    pub tenant_id: TenantId,
    pub node_id: NodeId,
    pub tag: String,
    pub selector: Vec<String>,
    #[serde(default)]
    pub strategy: BalancerStrategy,
    #[serde(default)]
    pub fallback_tag: Option<String>,
}

/// A credentialed principal, bound by tag to inbounds on its node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    #[serde(default)]
    pub id: EntityId,
    pub tenant_id: TenantId,
    pub node_id: NodeId,
    /// Unique per node; used as the traffic accounting key.
    pub email: String,
    #[serde(default)]
    pub uuid: Option<uuid::Uuid>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub flow: Option<String>,
    #[serde(default)]
    pub level: u32,
    /// Zero means unlimited.
    #[serde(default)]
    pub quota_bytes: u64,
    #[serde(default)]
    pub used_bytes: u64,
    /// Seconds since epoch; `None` never expires.
    #[serde(default)]
    pub expiry: Option<u64>,
    #[serde(default)]
    pub device_limit: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub inbound_tags: Vec<String>,
    #[serde(default)]
    pub outbound_tag: Option<String>,
}

impl Client {
    /// Enabled, unexpired and within quota at `now`.
    pub fn is_eligible(&self, now: u64) -> bool {
        if !self.enabled {
            return false;
        }
        if matches!(self.expiry, Some(expiry) if expiry <= now) {
            return false;
        }
        !(self.quota_bytes > 0 && self.used_bytes >= self.quota_bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Routing,
    Dns,
    Policy,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Routing => "routing",
            DocumentKind::Dns => "dns",
            DocumentKind::Policy => "policy",
        }
    }
}

/// Per-node routing rule set, DNS config or policy config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDocument {
    pub tenant_id: TenantId,
    pub node_id: NodeId,
    pub kind: DocumentKind,
    pub body: serde_json::Value,
}

fn default_enabled() -> bool {
    true
}
