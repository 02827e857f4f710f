//! Sync protocol.
//!
//! # Data Flow
//! ```text
//! register  (enrollment key) → upsert node by key → cache.get → mark delivered
//! heartbeat (node token)     → record stats + last_seen → liveness Heartbeat
//!                            → cache.get → compare with delivered version
//! fetch     (node token)     → cache.get → mark delivered
//! stats     (node token)     → StatsAggregator::merge
//! admin sync                 → cache.invalidate + clear delivered
//! ```
//!
//! # Design Decisions
//! - The delivered version lives in the shared cache store, never trusted
//!   from the agent
//! - A credential resolves to exactly one node; a body or path `nodeId` that
//!   disagrees is rejected as unauthorized

pub mod handler;
pub mod token;
pub mod types;

pub use handler::SyncService;
pub use token::{generate_token, parse_bearer};
pub use types::{
    ConfigResponse, HeartbeatRequest, HeartbeatResponse, RegisterRequest, RegisterResponse,
    StatsEntry, StatsRequest, StatsResponse, SyncResponse,
};
