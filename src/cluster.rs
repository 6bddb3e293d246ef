/// Leader discovery and failover
///
/// The locator walks the node directory in order, asking each reachable
/// node who leads the cluster. Probes are throwaway sessions: connect,
/// handshake, one leader query, teardown. Every failed probe is recorded
/// so an exhausted search names what went wrong on every node.
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::connection::ClusterConnection;
use crate::error::{FaroError, FaroResult};
use crate::node_store::{MemoryNodeStore, NodeRecord, NodeStore};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::session::ProtocolSession;

/// Finds the cluster leader and opens connections to it
pub struct ClusterLocator {
    node_store: Arc<dyn NodeStore>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl ClusterLocator {
    pub fn new(node_store: Arc<dyn NodeStore>, timeout: Duration) -> Self {
        Self {
            node_store,
            timeout,
            retry: RetryPolicy::default(),
        }
    }

    /// Build a locator over an in-memory directory seeded from addresses
    pub fn from_addresses<S: AsRef<str>>(addresses: &[S], timeout: Duration) -> Self {
        Self::new(Arc::new(MemoryNodeStore::from_addresses(addresses)), timeout)
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Discover the current leader's address
    ///
    /// Nodes are probed in directory order. A node may answer with an empty
    /// address, meaning it is the leader itself, or with another node's
    /// address, which is trusted verbatim and not probed again; a stale
    /// answer surfaces later as a connect failure and the retrying caller
    /// re-runs discovery. With no nodes configured this fails immediately
    /// without any probing.
    pub async fn find_leader(&self) -> FaroResult<String> {
        let nodes = self.node_store.get_nodes().await;
        if nodes.is_empty() {
            return Err(FaroError::cluster("No nodes configured"));
        }

        let mut errors = Vec::new();
        for node in &nodes {
            match self.probe_node(&node.address).await {
                Ok(leader) => {
                    info!("Leader {} reported by {}", leader, node.address);
                    return Ok(leader);
                }
                Err(e) => {
                    warn!("Leader probe of {} failed: {}", node.address, e);
                    errors.push(format!("{}: {}", node.address, e));
                }
            }
        }

        Err(FaroError::cluster(format!(
            "Could not find leader. Errors: {}",
            errors.join("; ")
        )))
    }

    /// Ask one node for the leader over a throwaway session
    async fn probe_node(&self, address: &str) -> FaroResult<String> {
        let mut session = ProtocolSession::connect(address, self.timeout).await?;
        let outcome = Self::ask_leader(&mut session).await;
        session.close().await;
        session.wait_closed().await;

        let (_node_id, leader) = outcome?;
        if leader.is_empty() {
            // The probed node is the leader itself
            Ok(address.to_string())
        } else {
            Ok(leader)
        }
    }

    async fn ask_leader(session: &mut ProtocolSession) -> FaroResult<(u64, String)> {
        session.handshake(0).await?;
        session.get_leader().await
    }

    /// Open a connection to the leader, retrying discovery per the policy
    ///
    /// Each attempt runs the full unit: find the leader, connect to it,
    /// handshake, open the database. A leader change between discovery and
    /// connect therefore heals on the next attempt.
    pub async fn connect(&self, database: &str) -> FaroResult<ClusterConnection> {
        retry_with_backoff(&self.retry, move || async move {
            let leader = self.find_leader().await?;
            let mut conn = ClusterConnection::new(leader, database, self.timeout);
            conn.connect().await?;
            Ok(conn)
        })
        .await
    }

    /// Replace the node directory wholesale
    pub async fn update_nodes(&self, nodes: Vec<NodeRecord>) {
        self.node_store.set_nodes(nodes).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{init_tracing, reserved_addr, MockNode, Reply};
    use crate::wire::Response;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts).with_base_delay(Duration::from_millis(1))
    }

    fn welcome() -> Vec<Reply> {
        vec![Reply::Send(Response::Welcome {
            heartbeat_timeout: 1000,
        })]
    }

    fn leader(address: &str) -> Vec<Reply> {
        vec![Reply::Send(Response::Leader {
            node_id: 1,
            address: address.to_string(),
        })]
    }

    #[tokio::test]
    async fn test_find_leader_with_empty_directory() {
        let locator = ClusterLocator::new(Arc::new(MemoryNodeStore::new()), TIMEOUT);
        let err = locator.find_leader().await.unwrap_err();

        assert!(matches!(err, FaroError::Cluster(_)));
        assert!(err.to_string().contains("No nodes configured"));
    }

    #[tokio::test]
    async fn test_find_leader_self_reported() {
        // An empty leader address means the probed node leads
        let node = MockNode::start(vec![welcome(), leader("")]).await;

        let locator = ClusterLocator::from_addresses(&[node.address()], TIMEOUT);
        let found = locator.find_leader().await.unwrap();

        assert_eq!(found, node.address());
    }

    #[tokio::test]
    async fn test_find_leader_redirect_taken_verbatim() {
        let node = MockNode::start(vec![welcome(), leader("10.9.9.9:4001")]).await;

        let locator = ClusterLocator::from_addresses(&[node.address()], TIMEOUT);
        let found = locator.find_leader().await.unwrap();

        // The reported address is returned without probing it
        assert_eq!(found, "10.9.9.9:4001");
    }

    #[tokio::test]
    async fn test_find_leader_skips_dead_node() {
        let dead = reserved_addr().await;
        let alive = MockNode::start(vec![welcome(), leader("")]).await;

        let locator =
            ClusterLocator::from_addresses(&[dead.as_str(), alive.address()], TIMEOUT);
        let found = locator.find_leader().await.unwrap();

        assert_eq!(found, alive.address());
    }

    #[tokio::test]
    async fn test_find_leader_exhaustion_records_every_node() {
        let dead_a = reserved_addr().await;
        let dead_b = reserved_addr().await;

        let locator =
            ClusterLocator::from_addresses(&[dead_a.as_str(), dead_b.as_str()], TIMEOUT);
        let err = locator.find_leader().await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("Could not find leader"));
        assert!(message.contains(&format!("{}:", dead_a)), "missing first node: {}", message);
        assert!(message.contains(&format!("{}:", dead_b)), "missing second node: {}", message);
        // Two failed nodes produce exactly two entries, one separator
        assert_eq!(message.matches("; ").count(), 1, "expected two entries: {}", message);
    }

    #[tokio::test]
    async fn test_probe_failure_after_connect_is_recorded() {
        let node = MockNode::start(vec![vec![Reply::Send(Response::Failure {
            code: 1,
            message: "not ready".to_string(),
        })]])
        .await;

        let locator = ClusterLocator::from_addresses(&[node.address()], TIMEOUT);
        let err = locator.find_leader().await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains(node.address()));
        assert!(message.contains("not ready"));
    }

    #[tokio::test]
    async fn test_connect_retries_until_leader_appears() {
        init_tracing();
        // First probe fails at the leader query, second succeeds, then the
        // real connection is established on a third socket
        let node = MockNode::start_serial(vec![
            vec![welcome(), vec![Reply::Send(Response::Failure {
                code: 1,
                message: "election in progress".to_string(),
            })]],
            vec![welcome(), leader("")],
            vec![welcome(), vec![Reply::Send(Response::Db { db_id: 1 })]],
        ])
        .await;

        let locator = ClusterLocator::from_addresses(&[node.address()], TIMEOUT)
            .with_retry_policy(fast_retry(5));
        let conn = locator.connect("app.db").await.unwrap();

        assert!(conn.is_connected());
        assert_eq!(conn.address(), node.address());
    }

    #[tokio::test]
    async fn test_connect_exhausts_retries() {
        let dead = reserved_addr().await;

        let locator = ClusterLocator::from_addresses(&[dead.as_str()], TIMEOUT)
            .with_retry_policy(fast_retry(2));
        let err = locator.connect("app.db").await.unwrap_err();

        assert!(matches!(err, FaroError::Cluster(_)));
    }

    #[tokio::test]
    async fn test_update_nodes_replaces_directory() {
        let dead = reserved_addr().await;
        let alive = MockNode::start(vec![welcome(), leader("")]).await;

        let locator = ClusterLocator::from_addresses(&[dead.as_str()], TIMEOUT);
        locator
            .update_nodes(vec![NodeRecord::new(
                0,
                alive.address(),
                crate::node_store::NodeRole::Voter,
            )])
            .await;

        assert_eq!(locator.find_leader().await.unwrap(), alive.address());
    }
}
