//! Node liveness subsystem.
//!
//! # Data Flow
//! ```text
//! Heartbeat (sync/handler.rs):
//!     agent call
//!     → state.rs transition(status, Heartbeat)
//!     → store compare-and-set
//!
//! Sweep (sweeper.rs):
//!     periodic timer
//!     → nodes whose last_seen is older than the timeout
//!     → state.rs transition(status, Timeout)
//!     → store compare-and-set (overlapping sweeps are no-ops)
//!
//! Operator (admin API):
//!     → transition(status, EnterMaintenance | ExitMaintenance)
//! ```
//!
//! # Design Decisions
//! - Transitions are a pure function of (state, event); timers and storage
//!   live outside it
//! - Maintenance is only ever left by operator action

pub mod state;
pub mod sweeper;

pub use state::{is_expired, transition, LivenessEvent, NodeStatus};
pub use sweeper::{dispatchable_nodes, LivenessSweeper};
