/// Cluster membership directory
///
/// The locator asks a `NodeStore` which nodes to probe. The store is a
/// pluggable seam so deployments can back it with service discovery; the
/// in-memory implementation covers the common static-address case.
use async_trait::async_trait;
use std::fmt;
use tokio::sync::RwLock;

/// Role of a node within the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Holds no data, eligible for promotion
    Spare = 0,
    /// Votes in leader elections
    Voter = 1,
    /// Replicates data without voting
    Standby = 2,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Spare => write!(f, "spare"),
            NodeRole::Voter => write!(f, "voter"),
            NodeRole::Standby => write!(f, "standby"),
        }
    }
}

/// One known cluster member
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: u64,
    pub address: String,
    pub role: NodeRole,
}

impl NodeRecord {
    pub fn new<S: Into<String>>(id: u64, address: S, role: NodeRole) -> Self {
        Self {
            id,
            address: address.into(),
            role,
        }
    }
}

/// Source of cluster membership
///
/// `get_nodes` returns an ordered snapshot; the locator probes in that
/// order. `set_nodes` replaces the membership wholesale, there is no
/// incremental update.
#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn get_nodes(&self) -> Vec<NodeRecord>;
    async fn set_nodes(&self, nodes: Vec<NodeRecord>);
}

/// In-memory node store backed by a read-write lock
#[derive(Debug, Default)]
pub struct MemoryNodeStore {
    nodes: RwLock<Vec<NodeRecord>>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from bare addresses, assigning sequential ids and the
    /// voter role to every node
    pub fn from_addresses<S: AsRef<str>>(addresses: &[S]) -> Self {
        let nodes = addresses
            .iter()
            .enumerate()
            .map(|(i, addr)| NodeRecord::new(i as u64, addr.as_ref(), NodeRole::Voter))
            .collect();
        Self {
            nodes: RwLock::new(nodes),
        }
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn get_nodes(&self) -> Vec<NodeRecord> {
        self.nodes.read().await.clone()
    }

    async fn set_nodes(&self, nodes: Vec<NodeRecord>) {
        *self.nodes.write().await = nodes;
    }
}
