//! JSON fixtures for bootstrapping the in-memory store.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::model::{Balancer, Client, Inbound, Node, NodeDocument, Outbound};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Rows to preload, one array per table.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub nodes: Vec<Node>,
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
    pub balancers: Vec<Balancer>,
    pub clients: Vec<Client>,
    pub documents: Vec<NodeDocument>,
}

pub fn load_seed(path: &Path) -> Result<Seed, SeedError> {
    let content = fs::read_to_string(path)?;
    let seed: Seed = serde_json::from_str(&content)?;
    tracing::info!(
        path = %path.display(),
        nodes = seed.nodes.len(),
        inbounds = seed.inbounds.len(),
        outbounds = seed.outbounds.len(),
        clients = seed.clients.len(),
        "Loaded store seed"
    );
    Ok(seed)
}
