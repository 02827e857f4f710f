//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the control
//! plane. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the control plane.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Agent listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Liveness, heartbeat, stats and enrollment settings.
    pub sync: SyncConfig,

    /// Single-flight build settings.
    pub cache: CacheConfig,

    /// Structured store settings.
    pub store: StoreConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// An enrollment key admitting new nodes into one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EnrollmentKey {
    pub key: String,
    pub tenant_id: String,
}

/// Agent protocol configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// A node with no heartbeat for this long is offline.
    pub heartbeat_timeout_secs: u64,

    /// How often the liveness sweep runs.
    pub sweep_interval_secs: u64,

    /// Heartbeat cadence suggested to agents.
    pub heartbeat_interval_secs: u64,

    /// Width of a stats window when the agent does not supply one.
    pub stats_window_secs: u64,

    /// Number of stats windows kept before pruning.
    pub stats_retention_windows: u64,

    /// Keys accepted by `register`.
    pub enrollment_keys: Vec<EnrollmentKey>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 90,
            sweep_interval_secs: 15,
            heartbeat_interval_secs: 30,
            stats_window_secs: 60,
            stats_retention_windows: 1440,
            enrollment_keys: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Tenant admitted by `key`, if any.
    pub fn tenant_for_key(&self, key: &str) -> Option<&str> {
        self.enrollment_keys
            .iter()
            .find(|k| k.key == key)
            .map(|k| k.tenant_id.as_str())
    }
}

/// Config cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a caller waits on an in-flight build, in milliseconds.
    pub build_wait_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            build_wait_timeout_ms: 10_000,
        }
    }
}

/// Structured store configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON fixture loaded into the in-memory store at startup.
    pub seed_path: Option<String>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

pub const PLACEHOLDER_ADMIN_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_ADMIN_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
