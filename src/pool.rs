/// Bounded pool of leader-bound connections
///
/// Capacity is gated by a semaphore with one permit per slot, so at most
/// max_size connections are ever checked out or idle. The pool replaces
/// faulty connections transparently: a connection whose operation failed
/// is discarded on release and the next acquire dials a fresh one through
/// the locator.
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::cluster::ClusterLocator;
use crate::config::ClientConfig;
use crate::connection::{ClusterConnection, QueryResult};
use crate::error::{FaroError, FaroResult};
use crate::wire::Value;

/// Pool of connections to the current cluster leader
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    locator: ClusterLocator,
    database: String,
    min_size: usize,
    max_size: usize,
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState>,
}

struct PoolState {
    idle: VecDeque<ClusterConnection>,
    /// Connections accounted to the pool: idle plus checked out
    size: usize,
    closed: bool,
}

impl ConnectionPool {
    /// Build a pool over a locator
    ///
    /// `max_size` must be at least 1; `min_size` only drives `initialize`.
    pub fn new<D: Into<String>>(
        locator: ClusterLocator,
        database: D,
        min_size: usize,
        max_size: usize,
    ) -> Self {
        debug_assert!(max_size >= 1, "pool needs at least one slot");
        Self {
            inner: Arc::new(PoolInner {
                locator,
                database: database.into(),
                min_size,
                max_size,
                semaphore: Arc::new(Semaphore::new(max_size)),
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    size: 0,
                    closed: false,
                }),
            }),
        }
    }

    /// Build a pool over an in-memory directory seeded from addresses
    pub fn from_addresses<S: AsRef<str>, D: Into<String>>(
        addresses: &[S],
        database: D,
        min_size: usize,
        max_size: usize,
        timeout: Duration,
    ) -> Self {
        let locator = ClusterLocator::from_addresses(addresses, timeout);
        Self::new(locator, database, min_size, max_size)
    }

    /// Build a pool from a validated client configuration
    pub fn from_config(config: &ClientConfig) -> Self {
        let timeout = Duration::from_millis(config.cluster.connect_timeout_ms);
        let locator = ClusterLocator::from_addresses(&config.cluster.nodes, timeout)
            .with_retry_policy(config.retry.to_policy());
        Self::new(
            locator,
            &config.database.name,
            config.pool.min_size,
            config.pool.max_size,
        )
    }

    /// Eagerly open min_size connections
    pub async fn initialize(&self) -> FaroResult<()> {
        for _ in 0..self.inner.min_size {
            let conn = self.inner.locator.connect(&self.inner.database).await?;
            let mut state = self.inner.state_lock();
            if state.closed {
                return Err(FaroError::connection("Pool is closed"));
            }
            state.size += 1;
            state.idle.push_back(conn);
        }
        info!(
            "Pool initialized with {} connections to database {:?}",
            self.inner.min_size, self.inner.database
        );
        Ok(())
    }

    /// Check a connection out of the pool
    ///
    /// Blocks while max_size connections are checked out; waiters are
    /// served in FIFO order (a property of the semaphore, not a contract).
    /// Fails immediately once the pool is closed, including for callers
    /// already waiting. Cancelling a waiting acquire releases nothing
    /// because nothing is held yet.
    pub async fn acquire(&self) -> FaroResult<PooledConnection> {
        if self.inner.state_lock().closed {
            return Err(FaroError::connection("Pool is closed"));
        }

        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FaroError::connection("Pool is closed"))?;

        let reused = {
            let mut state = self.inner.state_lock();
            if state.closed {
                return Err(FaroError::connection("Pool is closed"));
            }
            state.idle.pop_front()
        };

        let conn = match reused {
            Some(mut conn) => {
                if conn.is_connected() {
                    conn
                } else {
                    // Idle connection was closed; reconnect it in place
                    match conn.connect().await {
                        Ok(()) => conn,
                        Err(e) => {
                            conn.close().await;
                            self.inner.state_lock().size -= 1;
                            return Err(e);
                        }
                    }
                }
            }
            None => {
                let mut conn = self.inner.locator.connect(&self.inner.database).await?;
                // Guard scoped to a block: holding it across the await
                // below would make this future !Send
                let (closed, size) = {
                    let mut state = self.inner.state_lock();
                    if !state.closed {
                        state.size += 1;
                    }
                    (state.closed, state.size)
                };
                if closed {
                    conn.close().await;
                    return Err(FaroError::connection("Pool is closed"));
                }
                debug!(
                    "Pool opened connection to {} ({}/{})",
                    conn.address(),
                    size,
                    self.inner.max_size
                );
                conn
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            faulty: false,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Acquire a connection, run one statement, release
    pub async fn execute(&self, sql: &str, params: Vec<Value>) -> FaroResult<(u64, u64)> {
        let mut conn = self.acquire().await?;
        conn.execute(sql, params).await
    }

    /// Acquire a connection, run one query, release
    pub async fn fetch(&self, sql: &str, params: Vec<Value>) -> FaroResult<QueryResult> {
        let mut conn = self.acquire().await?;
        conn.fetch(sql, params).await
    }

    /// Close the pool: fail waiters, drain idle connections
    ///
    /// Checked-out connections are not interrupted; their guards discard
    /// them on release. Idempotent.
    pub async fn close(&self) {
        let drained = {
            let mut state = self.inner.state_lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.size -= state.idle.len();
            std::mem::take(&mut state.idle)
        };

        self.inner.semaphore.close();

        for mut conn in drained {
            conn.close().await;
        }
        info!("Connection pool closed");
    }

    /// Connections accounted to the pool, idle plus checked out
    pub fn size(&self) -> usize {
        self.inner.state_lock().size
    }

    pub fn idle_count(&self) -> usize {
        self.inner.state_lock().idle.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state_lock().closed
    }

    pub fn min_size(&self) -> usize {
        self.inner.min_size
    }

    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }
}

impl PoolInner {
    fn state_lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return a connection to the pool or discard it
    ///
    /// Runs before the caller's permit is released, so a waiter woken by
    /// the permit always observes the just-returned connection.
    fn release(&self, conn: ClusterConnection, faulty: bool) {
        let mut state = self.state_lock();
        if faulty || state.closed {
            state.size -= 1;
            debug!(
                "Pool discarded connection to {} ({} outstanding)",
                conn.address(),
                state.size
            );
            // Dropping the connection closes its socket
        } else if state.idle.len() < self.max_size {
            state.idle.push_back(conn);
        } else {
            // Queue unexpectedly full; discard rather than overflow
            state.size -= 1;
        }
    }
}

/// A checked-out connection that returns itself on drop
///
/// Every operation marks the connection faulty before awaiting and clears
/// the mark on success, so an error or a cancellation mid-operation leaves
/// it faulty. Faulty connections are discarded on drop, never handed to a
/// later acquire.
pub struct PooledConnection {
    conn: Option<ClusterConnection>,
    faulty: bool,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Execute SQL that returns no rows
    pub async fn execute(&mut self, sql: &str, params: Vec<Value>) -> FaroResult<(u64, u64)> {
        self.faulty = true;
        let conn = self.connection_mut()?;
        let result = conn.execute(sql, params).await;
        self.faulty = result.is_err();
        result
    }

    /// Execute SQL and collect every result row
    pub async fn fetch(&mut self, sql: &str, params: Vec<Value>) -> FaroResult<QueryResult> {
        self.faulty = true;
        let conn = self.connection_mut()?;
        let result = conn.fetch(sql, params).await;
        self.faulty = result.is_err();
        result
    }

    /// Fetch just the first row, if any
    pub async fn fetch_one(
        &mut self,
        sql: &str,
        params: Vec<Value>,
    ) -> FaroResult<Option<Vec<Value>>> {
        self.faulty = true;
        let conn = self.connection_mut()?;
        let result = conn.fetch_one(sql, params).await;
        self.faulty = result.is_err();
        result
    }

    /// Fetch the first column of the first row, if any
    pub async fn fetch_val(&mut self, sql: &str, params: Vec<Value>) -> FaroResult<Option<Value>> {
        self.faulty = true;
        let conn = self.connection_mut()?;
        let result = conn.fetch_val(sql, params).await;
        self.faulty = result.is_err();
        result
    }

    /// Run a body inside a transaction scope on this connection
    pub async fn with_transaction<T, F>(&mut self, body: F) -> FaroResult<T>
    where
        F: for<'c> FnOnce(&'c mut ClusterConnection) -> BoxFuture<'c, FaroResult<T>>,
    {
        self.faulty = true;
        let conn = self.connection_mut()?;
        let result = conn.with_transaction(body).await;
        self.faulty = result.is_err();
        result
    }

    /// Address of the node this connection is bound to
    pub fn address(&self) -> &str {
        match &self.conn {
            Some(conn) => conn.address(),
            None => "",
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.as_ref().map(|c| c.is_connected()).unwrap_or(false)
    }

    fn connection_mut(&mut self) -> FaroResult<&mut ClusterConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| FaroError::connection("Connection already released"))
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .field("faulty", &self.faulty)
            .finish_non_exhaustive()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.faulty);
        }
        // The permit field drops after this body, waking one waiter only
        // once the connection is back in the queue
    }
}
