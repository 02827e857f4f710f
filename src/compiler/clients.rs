//! Per-protocol client entries.

use serde_json::{json, Value};

use crate::error::SyncError;
use crate::model::Client;

/// Settings key holding the credential list for `protocol`.
pub fn list_key(protocol: &str) -> Option<&'static str> {
    match protocol {
        "vless" | "vmess" | "trojan" | "shadowsocks" => Some("clients"),
        "socks" | "http" => Some("accounts"),
        _ => None,
    }
}

/// The entry emitted for `client` inside an inbound speaking `protocol`.
pub fn client_entry(protocol: &str, client: &Client) -> Result<Value, SyncError> {
    let entity = format!("client {}", client.email);
    let password = || {
        client
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| SyncError::validation(&entity, format!("{} requires a password", protocol)))
    };
    let uuid = || {
        client
            .uuid
            .ok_or_else(|| SyncError::validation(&entity, format!("{} requires a uuid", protocol)))
    };

    match protocol {
        "vless" => {
            let mut entry = json!({
                "id": uuid()?,
                "email": client.email,
                "level": client.level,
            });
            if let Some(flow) = client.flow.as_deref().filter(|f| !f.is_empty()) {
                entry["flow"] = json!(flow);
            }
            Ok(entry)
        }
        "vmess" => Ok(json!({
            "id": uuid()?,
            "email": client.email,
            "level": client.level,
            "alterId": 0,
        })),
        "trojan" | "shadowsocks" => Ok(json!({
            "password": password()?,
            "email": client.email,
            "level": client.level,
        })),
        "socks" | "http" => Ok(json!({
            "user": client.email,
            "pass": password()?,
        })),
        other => Err(SyncError::validation(
            entity,
            format!("protocol '{}' does not accept clients", other),
        )),
    }
}
