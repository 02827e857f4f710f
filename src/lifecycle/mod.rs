//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → bootstrap services → Start background tasks → Bind listeners
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → servers drain, sweeper and pruner exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - One broadcast channel reaches every long-running task

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{bootstrap, Services, StartupError};
