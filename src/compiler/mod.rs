//! Config Compiler
//!
//! Turns a node's structured rows into the single JSON document its proxy
//! core runs.
//!
//! # Data Flow
//! ```text
//! ConfigStore::snapshot ──▶ NodeSnapshot ──▶ compile() ──▶ CompiledDocument
//!                                              │              ├─ body
//!                                              │              ├─ version (sha256)
//!                                              │              └─ issues
//!                                              ├─ stream:  legacy blob vs columns
//!                                              ├─ clients: per-protocol entries
//!                                              └─ routing: balancers, rules, dns, policy
//! ```
//!
//! # Design Decisions
//! - Pure: no I/O, no clock reads, no logging of issues. The cache layer logs
//!   them with node and tenant context.
//! - A bad entity never fails the build; it is left out and reported.
//! - Every collection is sorted before emission so equal inputs hash equal.

pub mod builder;
pub mod clients;
pub mod document;
pub mod routing;
pub mod stream;

pub use builder::compile;
pub use document::{apply_overrides, content_version, CompiledDocument};
pub use stream::{resolve_stream_settings, Direction};
