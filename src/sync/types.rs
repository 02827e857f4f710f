//! Agent wire types. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{HostInfo, NodeId, RuntimeStats};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub node_key: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl RegisterRequest {
    pub fn host_info(&self) -> HostInfo {
        HostInfo {
            hostname: self.hostname.clone(),
            public_ip: self.public_ip.clone(),
            agent_version: self.version.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub node_id: NodeId,
    /// Bearer credential for every later call.
    pub token: String,
    pub config: Value,
    pub config_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub node_id: NodeId,
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub memory_usage: f64,
    #[serde(default)]
    pub disk_usage: f64,
    #[serde(default)]
    pub network_in: u64,
    #[serde(default)]
    pub network_out: u64,
    #[serde(default)]
    pub active_connections: u64,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub uptime_secs: Option<u64>,
    #[serde(default)]
    pub online_users: Option<u64>,
}

impl HeartbeatRequest {
    pub fn runtime_stats(&self) -> RuntimeStats {
        RuntimeStats {
            cpu_usage: self.cpu_usage,
            memory_usage: self.memory_usage,
            disk_usage: self.disk_usage,
            network_in: self.network_in,
            network_out: self.network_out,
            active_connections: self.active_connections,
            running: self.running,
            uptime_secs: self.uptime_secs,
            online_users: self.online_users,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub config_version: String,
    pub needs_update: bool,
    pub heartbeat_interval_secs: u64,
}

/// The compiled document with its version alongside the top-level sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub version: String,
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsRequest {
    pub node_id: NodeId,
    /// Reporting window chosen by the agent; the server time bucket otherwise.
    #[serde(default)]
    pub window: Option<u64>,
    /// Entries are parsed one at a time so a bad one cannot sink the batch.
    #[serde(default)]
    pub stats: Vec<Value>,
}

/// One traffic counter line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsEntry {
    pub tag: String,
    pub uplink: u64,
    pub downlink: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub success: bool,
    pub window: u64,
    pub accepted: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub success: bool,
    pub node_id: NodeId,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_heartbeat_request_uses_camel_case() {
        let node_id = NodeId::new();
        let req: HeartbeatRequest = serde_json::from_value(json!({
            "nodeId": node_id,
            "cpuUsage": 12.5,
            "memoryUsage": 40.0,
            "activeConnections": 7,
            "running": true
        }))
        .unwrap();
        assert_eq!(req.node_id, node_id);
        assert_eq!(req.runtime_stats().active_connections, 7);
        assert_eq!(req.runtime_stats().network_in, 0);
    }

    #[test]
    fn test_config_response_flattens_document() {
        let mut config = Map::new();
        config.insert("inbounds".into(), json!([]));
        let body = serde_json::to_value(ConfigResponse {
            version: "abc".into(),
            config,
        })
        .unwrap();
        assert_eq!(body, json!({ "inbounds": [], "version": "abc" }));
    }
}
