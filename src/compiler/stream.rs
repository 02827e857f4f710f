//! Transport and security sub-document resolution.
//!
//! One precedence order, applied in one place:
//! 1. a non-empty legacy `stream_settings` blob is emitted verbatim;
//! 2. otherwise the sub-document is rebuilt from structured columns.
//!
//! A blob that is present but unusable (not an object, unparseable text)
//! is reported and falls through to step 2.

use serde_json::{json, Map, Value};

use crate::error::SyncError;
use crate::model::{Network, SecurityKind, SecuritySettings, TransportSettings};

/// Which side of the proxy the settings describe; security requirements differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

enum Legacy {
    Absent,
    Present(Value),
    Unusable(String),
}

fn classify_legacy(blob: Option<&Value>) -> Legacy {
    match blob {
        None | Some(Value::Null) => Legacy::Absent,
        Some(Value::Object(map)) if map.is_empty() => Legacy::Absent,
        Some(value) if value.is_object() => Legacy::Present(value.clone()),
        Some(Value::String(text)) if text.trim().is_empty() => Legacy::Absent,
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) if map.is_empty() => Legacy::Absent,
            Ok(Value::Null) => Legacy::Absent,
            Ok(parsed @ Value::Object(_)) => Legacy::Present(parsed),
            Ok(_) => Legacy::Unusable("stored text is not a JSON object".to_string()),
            Err(e) => Legacy::Unusable(format!("stored text is not valid JSON: {}", e)),
        },
        Some(_) => Legacy::Unusable("expected a JSON object".to_string()),
    }
}

/// The `streamSettings` value for one inbound or outbound.
///
/// Problems are appended to `issues`; resolution itself never fails.
pub fn resolve_stream_settings(
    entity: &str,
    direction: Direction,
    legacy: Option<&Value>,
    transport: &TransportSettings,
    security: &SecuritySettings,
    issues: &mut Vec<SyncError>,
) -> Value {
    match classify_legacy(legacy) {
        Legacy::Present(blob) => return blob,
        Legacy::Unusable(reason) => {
            issues.push(SyncError::validation(
                format!("{} stream_settings", entity),
                reason,
            ));
        }
        Legacy::Absent => {}
    }

    let mut stream = transport_section(transport);
    match security_section(direction, security) {
        Ok(Some((key, settings))) => {
            stream.insert("security".into(), json!(security.kind.as_str()));
            stream.insert(key.into(), settings);
        }
        Ok(None) => {
            stream.insert("security".into(), json!("none"));
        }
        Err(reason) => {
            // Incomplete security: omit the whole sub-section.
            issues.push(SyncError::validation(format!("{} security", entity), reason));
        }
    }
    Value::Object(stream)
}

fn transport_section(transport: &TransportSettings) -> Map<String, Value> {
    let mut stream = Map::new();
    stream.insert("network".into(), json!(transport.network.as_str()));

    match transport.network {
        Network::Tcp => {
            if let Some(header) = non_blank(&transport.tcp_header_type) {
                if header != "none" {
                    stream.insert(
                        "tcpSettings".into(),
                        json!({ "header": { "type": header } }),
                    );
                }
            }
        }
        Network::Ws => {
            let mut ws = Map::new();
            if let Some(path) = non_blank(&transport.ws_path) {
                ws.insert("path".into(), json!(path));
            }
            if let Some(host) = non_blank(&transport.ws_host) {
                ws.insert("headers".into(), json!({ "Host": host }));
            }
            if !ws.is_empty() {
                stream.insert("wsSettings".into(), Value::Object(ws));
            }
        }
        Network::Grpc => {
            if let Some(name) = non_blank(&transport.grpc_service_name) {
                stream.insert("grpcSettings".into(), json!({ "serviceName": name }));
            }
        }
        Network::H2 => {
            let mut h2 = Map::new();
            if let Some(path) = non_blank(&transport.h2_path) {
                h2.insert("path".into(), json!(path));
            }
            let hosts: Vec<&String> = transport
                .h2_hosts
                .iter()
                .filter(|h| !h.trim().is_empty())
                .collect();
            if !hosts.is_empty() {
                h2.insert("host".into(), json!(hosts));
            }
            if !h2.is_empty() {
                stream.insert("httpSettings".into(), Value::Object(h2));
            }
        }
    }
    stream
}

/// `Ok(None)` for plain transport, `Err` naming the missing fields when the
/// chosen security type cannot be emitted completely.
fn security_section(
    direction: Direction,
    security: &SecuritySettings,
) -> Result<Option<(&'static str, Value)>, String> {
    match (security.kind, direction) {
        (SecurityKind::None, _) => Ok(None),
        (SecurityKind::Tls, Direction::Inbound) => {
            require(
                "tls",
                &[
                    ("cert_path", non_blank(&security.cert_path).is_some()),
                    ("key_path", non_blank(&security.key_path).is_some()),
                ],
            )?;
            let mut tls = Map::new();
            if let Some(name) = non_blank(&security.server_name) {
                tls.insert("serverName".into(), json!(name));
            }
            if !security.alpn.is_empty() {
                tls.insert("alpn".into(), json!(security.alpn));
            }
            tls.insert(
                "certificates".into(),
                json!([{
                    "certificateFile": non_blank(&security.cert_path),
                    "keyFile": non_blank(&security.key_path),
                }]),
            );
            Ok(Some(("tlsSettings", Value::Object(tls))))
        }
        (SecurityKind::Tls, Direction::Outbound) => {
            require(
                "tls",
                &[("server_name", non_blank(&security.server_name).is_some())],
            )?;
            let mut tls = Map::new();
            tls.insert("serverName".into(), json!(non_blank(&security.server_name)));
            if !security.alpn.is_empty() {
                tls.insert("alpn".into(), json!(security.alpn));
            }
            if let Some(fp) = non_blank(&security.fingerprint) {
                tls.insert("fingerprint".into(), json!(fp));
            }
            Ok(Some(("tlsSettings", Value::Object(tls))))
        }
        (SecurityKind::Reality, Direction::Inbound) => {
            require(
                "reality",
                &[
                    ("reality_private_key", non_blank(&security.reality_private_key).is_some()),
                    ("reality_dest", non_blank(&security.reality_dest).is_some()),
                    ("reality_server_names", !security.reality_server_names.is_empty()),
                ],
            )?;
            let short_ids = if security.reality_short_ids.is_empty() {
                vec![String::new()]
            } else {
                security.reality_short_ids.clone()
            };
            Ok(Some((
                "realitySettings",
                json!({
                    "show": false,
                    "dest": non_blank(&security.reality_dest),
                    "serverNames": security.reality_server_names,
                    "privateKey": non_blank(&security.reality_private_key),
                    "shortIds": short_ids,
                }),
            )))
        }
        (SecurityKind::Reality, Direction::Outbound) => {
            require(
                "reality",
                &[
                    ("reality_public_key", non_blank(&security.reality_public_key).is_some()),
                    ("server_name", non_blank(&security.server_name).is_some()),
                ],
            )?;
            Ok(Some((
                "realitySettings",
                json!({
                    "serverName": non_blank(&security.server_name),
                    "publicKey": non_blank(&security.reality_public_key),
                    "shortId": security.reality_short_ids.first().cloned().unwrap_or_default(),
                    "fingerprint": non_blank(&security.fingerprint).unwrap_or("chrome"),
                }),
            )))
        }
    }
}

fn require(kind: &str, fields: &[(&str, bool)]) -> Result<(), String> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, present)| !present)
        .map(|(name, _)| *name)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!("{} security requires {}", kind, missing.join(", ")))
    }
}

fn non_blank(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
