//! Error taxonomy for the synchronization core.
//!
//! # Propagation
//! ```text
//! per-entity problems during a build (IncompleteConfig, Validation)
//!     → collected on the compiled document, logged, entity omitted
//! protocol problems (NotFound, Unauthorized, BuildTimeout)
//!     → abort the single call, mapped to an HTTP status by http/error.rs
//! backend problems (CacheUnavailable, Store)
//!     → cache outages degrade to a direct compile; store outages abort the call
//! ```

use thiserror::Error;

use crate::model::NodeId;

/// Errors produced by the compiler, cache and sync layers.
///
/// `Clone` so a single-flight build result can be handed to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// Unknown node or tenant reference.
    #[error("node not found: {0}")]
    NotFound(NodeId),

    /// Unknown or revoked node credential; the agent must re-register.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A tag reference could not be resolved while building a document.
    #[error("{entity} references unknown tag '{reference}'")]
    IncompleteConfig { entity: String, reference: String },

    /// A malformed entity, document or stats entry.
    #[error("invalid {entity}: {reason}")]
    Validation { entity: String, reason: String },

    /// The shared cache store could not be reached.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// The structured config store failed.
    #[error("store error: {0}")]
    Store(String),

    /// Gave up waiting on an in-flight build.
    #[error("timed out after {0} ms waiting for config build")]
    BuildTimeout(u64),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn incomplete(entity: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::IncompleteConfig {
            entity: entity.into(),
            reference: reference.into(),
        }
    }

    pub fn validation(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable code used in API bodies and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::NotFound(_) => "not_found",
            SyncError::Unauthorized(_) => "unauthorized",
            SyncError::IncompleteConfig { .. } => "incomplete_config",
            SyncError::Validation { .. } => "validation",
            SyncError::CacheUnavailable(_) => "cache_unavailable",
            SyncError::Store(_) => "store",
            SyncError::BuildTimeout(_) => "build_timeout",
            SyncError::Internal(_) => "internal",
        }
    }

    /// Build-time issues never abort a document.
    pub fn is_build_issue(&self) -> bool {
        matches!(
            self,
            SyncError::IncompleteConfig { .. } | SyncError::Validation { .. }
        )
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised by a `ConfigStore` backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("node key '{0}' already registered")]
    DuplicateKey(String),

    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NodeNotFound(id) => SyncError::NotFound(id),
            other => SyncError::Store(other.to_string()),
        }
    }
}

/// Errors raised by a `CacheStore` backend.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unreachable: {0}")]
    Unavailable(String),
}

impl From<CacheError> for SyncError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Unavailable(msg) => SyncError::CacheUnavailable(msg),
        }
    }
}
