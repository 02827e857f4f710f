//! Compiled document, content versioning and node-level overrides.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::SyncError;
use crate::model::{NodeId, TenantId};

/// The proxy-core configuration built for one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledDocument {
    pub node_id: NodeId,
    pub tenant_id: TenantId,
    /// Content hash of `body`; equal bodies always share a version.
    pub version: String,
    /// Seconds since epoch. Not part of the version.
    pub built_at: u64,
    /// Earliest expiry among the clients bound into `body`. The document is
    /// stale from then on, whatever the cache generation says.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_expiry: Option<u64>,
    pub body: Value,
    /// Per-entity problems found while building. Never cached remotely.
    #[serde(skip)]
    pub issues: Vec<SyncError>,
}

impl CompiledDocument {
    /// Whether a bound client has expired by `now`.
    pub fn is_outlived(&self, now: u64) -> bool {
        self.next_expiry.is_some_and(|at| at <= now)
    }

    pub fn incomplete_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| matches!(i, SyncError::IncompleteConfig { .. }))
            .count()
    }
}

/// Hex SHA-256 over the canonical (key-sorted) serialization of `body`.
pub fn content_version(body: &Value) -> String {
    let canonical = canonicalize(body);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key.clone(), canonicalize(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Layer `overrides` onto `body`.
///
/// Top-level keys win over compiled keys. When both sides hold an object the
/// override's fields are written one by one instead of replacing the whole
/// section. A `null` removes the key it targets.
pub fn apply_overrides(body: &mut Value, overrides: &Value) -> Result<(), SyncError> {
    let Value::Object(patch) = overrides else {
        return Err(SyncError::validation(
            "node overrides",
            "expected a JSON object",
        ));
    };
    let Value::Object(target) = body else {
        return Err(SyncError::Internal("compiled body is not an object".into()));
    };

    for (key, value) in patch {
        match (target.get_mut(key), value) {
            (_, Value::Null) => {
                target.remove(key);
            }
            (Some(Value::Object(section)), Value::Object(fields)) => {
                for (field, field_value) in fields {
                    if field_value.is_null() {
                        section.remove(field);
                    } else {
                        section.insert(field.clone(), field_value.clone());
                    }
                }
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(())
}
