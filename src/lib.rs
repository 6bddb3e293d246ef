//! Async client for a dqlite-style replicated SQL cluster.
//!
//! faro speaks the cluster's synchronous request/response wire protocol
//! over TCP. It discovers the current leader by probing known nodes,
//! opens leader-bound connections, and can manage them behind a bounded
//! pool that transparently replaces faulty connections.
//!
//! ```no_run
//! use faro::Value;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), faro::FaroError> {
//!     let pool = faro::create_pool(
//!         &["10.0.0.1:9001", "10.0.0.2:9001"],
//!         "app",
//!         1,
//!         10,
//!         Duration::from_secs(15),
//!     )
//!     .await?;
//!
//!     pool.execute(
//!         "INSERT INTO users (name) VALUES (?)",
//!         vec![Value::from("ada")],
//!     )
//!     .await?;
//!
//!     let mut conn = pool.acquire().await?;
//!     let users = conn.fetch("SELECT id, name FROM users", vec![]).await?;
//!     for row in &users.rows {
//!         println!("{:?}", row);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cluster;
pub mod config;
pub mod connection;
pub mod error;
pub mod node_store;
pub mod pool;
pub mod retry;
pub mod session;
pub mod wire;

#[cfg(test)]
mod testutil;

pub use cluster::ClusterLocator;
pub use config::ClientConfig;
pub use connection::{ClusterConnection, QueryResult};
pub use error::{FaroError, FaroResult};
pub use node_store::{MemoryNodeStore, NodeRecord, NodeRole, NodeStore};
pub use pool::{ConnectionPool, PooledConnection};
pub use retry::RetryPolicy;
pub use session::ProtocolSession;
pub use wire::Value;

use std::time::Duration;

/// Connect to a single node directly and open a database
///
/// No leader discovery happens; the caller names the exact node to dial.
/// Use [`create_pool`] or [`ClusterLocator`] to reach whichever node
/// currently leads.
pub async fn connect<A: Into<String>, D: Into<String>>(
    address: A,
    database: D,
    timeout: Duration,
) -> FaroResult<ClusterConnection> {
    let mut conn = ClusterConnection::new(address, database, timeout);
    conn.connect().await?;
    Ok(conn)
}

/// Build a bounded pool of leader connections and open min_size of them
pub async fn create_pool<S: AsRef<str>>(
    addresses: &[S],
    database: &str,
    min_size: usize,
    max_size: usize,
    timeout: Duration,
) -> FaroResult<ConnectionPool> {
    let pool = ConnectionPool::from_addresses(addresses, database, min_size, max_size, timeout);
    pool.initialize().await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockNode, Reply};
    use crate::wire::{Request, Response};

    fn probe_script() -> Vec<Vec<Reply>> {
        vec![
            vec![Reply::Send(Response::Welcome {
                heartbeat_timeout: 1000,
            })],
            vec![Reply::Send(Response::Leader {
                node_id: 1,
                address: String::new(),
            })],
        ]
    }

    fn conn_script() -> Vec<Vec<Reply>> {
        vec![
            vec![Reply::Send(Response::Welcome {
                heartbeat_timeout: 1000,
            })],
            vec![Reply::Send(Response::Db { db_id: 1 })],
        ]
    }

    #[tokio::test]
    async fn test_connect_dials_the_named_node_directly() {
        let node = MockNode::start_serial(vec![conn_script()]).await;

        let conn = connect(node.address(), "app.db", Duration::from_secs(1))
            .await
            .unwrap();

        assert!(conn.is_connected());
        assert_eq!(conn.database(), "app.db");

        // Handshake and open only; no leader probe on a direct connect
        let requests = node.requests().await;
        assert_eq!(requests.len(), 2);
        assert!(matches!(requests[0], Request::Client { .. }));
        assert!(matches!(requests[1], Request::Open { .. }));
    }

    #[tokio::test]
    async fn test_create_pool_is_initialized() {
        let node = MockNode::start_serial(vec![probe_script(), conn_script()]).await;

        let pool = create_pool(&[node.address()], "app.db", 1, 4, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(pool.size(), 1);
        assert_eq!(pool.idle_count(), 1);
    }
}
