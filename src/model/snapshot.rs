//! Point-in-time view of every row that contributes to one node's document.

use serde::{Deserialize, Serialize};

use crate::model::entities::{Balancer, Client, DocumentKind, Inbound, NodeDocument, Outbound};
use crate::model::node::Node;

/// Every row a build reads, loaded in one pass by the store.
///
/// The compiler only ever sees this struct, never the live store, so a
/// single build cannot observe a half-applied mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node: Node,
    #[serde(default)]
    pub inbounds: Vec<Inbound>,
    #[serde(default)]
    pub outbounds: Vec<Outbound>,
    #[serde(default)]
    pub balancers: Vec<Balancer>,
    #[serde(default)]
    pub documents: Vec<NodeDocument>,
    #[serde(default)]
    pub clients: Vec<Client>,
}

impl NodeSnapshot {
    pub fn empty(node: Node) -> Self {
        Self {
            node,
            inbounds: Vec::new(),
            outbounds: Vec::new(),
            balancers: Vec::new(),
            documents: Vec::new(),
            clients: Vec::new(),
        }
    }

    /// The document of the given kind, if one is stored.
    pub fn document(&self, kind: DocumentKind) -> Option<&NodeDocument> {
        self.documents.iter().find(|d| d.kind == kind)
    }
}
