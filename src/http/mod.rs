//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (request ID, bearer credential)
//!     → agent.rs (register / heartbeat / config / stats)
//!     → SyncService
//!     → error.rs (SyncError → status code + JSON body)
//! ```

pub mod agent;
pub mod error;
pub mod request;
pub mod server;
pub mod tls;

pub use error::{ApiError, ApiResult, ErrorBody};
pub use request::{BearerToken, RequestIdExt, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
