//! Fleet Sync: control plane for a multi-tenant proxy fleet.
//!
//! # Architecture Overview
//!
//! ```text
//!     Agent                    ┌──────────────────────────────────────────────────────┐
//!     ─────────────────────────┼─▶ http (register / heartbeat / config / stats)       │
//!                              │        │                                             │
//!                              │        ▼                                             │
//!                              │      sync ──────────▶ stats (window aggregation)     │
//!                              │        │                                             │
//!                              │        ├────────────▶ liveness (state machine, sweep)│
//!                              │        ▼                                             │
//!                              │      cache (generation, single-flight builds)        │
//!                              │        │        ▲                                    │
//!                              │        ▼        │ invalidate on change               │
//!                              │    compiler ◀── store (tenant-scoped rows)           │
//!                              │                                                      │
//!     Operator ────────────────┼─▶ admin (status, nodes, sync, maintenance, usage)    │
//!                              │                                                      │
//!                              │   config · observability · lifecycle                 │
//!                              └──────────────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod cache;
pub mod compiler;
pub mod config;
pub mod error;
pub mod model;
pub mod store;

// Protocol
pub mod liveness;
pub mod stats;
pub mod sync;

// Surfaces
pub mod admin;
pub mod http;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::ControlPlaneConfig;
pub use error::{SyncError, SyncResult};
pub use http::HttpServer;
pub use lifecycle::{bootstrap, Services, Shutdown};
