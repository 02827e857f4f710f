//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID (`x-request-id`) is attached to every HTTP span
//! - Compile issues are logged with node and tenant fields by the cache layer
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
