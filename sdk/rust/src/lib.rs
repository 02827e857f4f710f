//! Agent-side client for the fleet-sync control plane.

pub mod client;
pub mod types;

pub use client::{AgentClient, SdkError};
pub use types::{
    ConfigResponse, HeartbeatRequest, HeartbeatResponse, RegisterRequest, RegisterResponse,
    StatsEntry, StatsResponse,
};
