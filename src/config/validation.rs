//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Detect duplicate enrollment keys and unsafe admin defaults
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Pure function: ControlPlaneConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{ControlPlaneConfig, PLACEHOLDER_ADMIN_KEY};

/// A single semantic violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &ControlPlaneConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::new("listener.max_body_bytes", "must be > 0"));
    }
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.trim().is_empty() {
            errors.push(ValidationError::new("listener.tls.cert_path", "must not be empty"));
        }
        if tls.key_path.trim().is_empty() {
            errors.push(ValidationError::new("listener.tls.key_path", "must not be empty"));
        }
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    let sync = &config.sync;
    for (field, value) in [
        ("sync.heartbeat_timeout_secs", sync.heartbeat_timeout_secs),
        ("sync.sweep_interval_secs", sync.sweep_interval_secs),
        ("sync.heartbeat_interval_secs", sync.heartbeat_interval_secs),
        ("sync.stats_window_secs", sync.stats_window_secs),
        ("sync.stats_retention_windows", sync.stats_retention_windows),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }
    if sync.sweep_interval_secs >= sync.heartbeat_timeout_secs {
        errors.push(ValidationError::new(
            "sync.sweep_interval_secs",
            "must be shorter than sync.heartbeat_timeout_secs",
        ));
    }
    let mut keys = HashSet::new();
    for (i, enrollment) in sync.enrollment_keys.iter().enumerate() {
        let field = format!("sync.enrollment_keys[{}]", i);
        if enrollment.key.trim().is_empty() {
            errors.push(ValidationError::new(&field, "key must not be empty"));
        } else if !keys.insert(enrollment.key.as_str()) {
            errors.push(ValidationError::new(&field, "duplicate key"));
        }
        if enrollment.tenant_id.trim().is_empty() {
            errors.push(ValidationError::new(&field, "tenant_id must not be empty"));
        }
    }

    if config.cache.build_wait_timeout_ms == 0 {
        errors.push(ValidationError::new("cache.build_wait_timeout_ms", "must be > 0"));
    }

    if config.admin.enabled {
        if config.admin.api_key.is_empty() || config.admin.api_key == PLACEHOLDER_ADMIN_KEY {
            errors.push(ValidationError::new(
                "admin.api_key",
                "must be set when the admin API is enabled",
            ));
        }
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("'{}' is not a socket address", config.admin.bind_address),
            ));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
