//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ControlPlaneConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → http server swaps its ArcSwap<ControlPlaneConfig>
//!     → sync service and sweeper read the new values on their next call
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Listener and admin addresses only apply at startup

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, CacheConfig, ControlPlaneConfig, EnrollmentKey, ListenerConfig, LogFormat,
    ObservabilityConfig, StoreConfig, SyncConfig, TimeoutConfig, TlsConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
