//! Version / cache layer.
//!
//! # Data Flow
//! ```text
//! fetchConfig / register / heartbeat
//!     → ConfigCache::get(tenant, node)
//!         ├─ generation + entry from CacheStore
//!         │     entry.generation == generation → hit
//!         ├─ in-flight build for ≥ generation  → join it
//!         └─ otherwise spawn a build            → snapshot → compile → store
//!
//! MemoryStore mutation
//!     → InvalidationTrigger (ChangeHook)
//!     → ConfigCache::invalidate → CacheStore::bump_generation
//! ```
//!
//! # Design Decisions
//! - Invalidation only bumps a counter; the next read rebuilds
//! - Builds run on their own task, so a waiter timing out never cancels one
//! - A store outage degrades to a direct compile instead of failing the agent

pub mod config_cache;
pub mod invalidation;
pub mod store;

pub use config_cache::ConfigCache;
pub use invalidation::InvalidationTrigger;
pub use store::{CacheEntry, CacheStore, MemoryCacheStore};
