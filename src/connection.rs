/// Logical connection to a cluster database
///
/// Wraps a protocol session together with the database handle obtained at
/// connect time, and layers the SQL conveniences on top: fetch helpers and
/// scoped transactions.
use futures::future::BoxFuture;
use std::time::Duration;
use tracing::debug;

use crate::error::{FaroError, FaroResult};
use crate::session::ProtocolSession;
use crate::wire::Value;

/// Client id sent during registration; the server does not key on it yet
const CLIENT_ID: u64 = 0;

/// Rows plus their column names, as returned by `fetch`
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Position of a named column, if present
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A connection bound to one database on one node
#[derive(Debug)]
pub struct ClusterConnection {
    address: String,
    database: String,
    timeout: Duration,
    session: Option<ProtocolSession>,
    db_id: Option<u32>,
    in_transaction: bool,
}

impl ClusterConnection {
    pub fn new<A: Into<String>, D: Into<String>>(address: A, database: D, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            database: database.into(),
            timeout,
            session: None,
            db_id: None,
            in_transaction: false,
        }
    }

    /// Establish the connection: TCP connect, handshake, open the database
    ///
    /// Calling this on an already-connected handle is a no-op. A failure
    /// during handshake or open tears the half-built session down before
    /// the error surfaces.
    pub async fn connect(&mut self) -> FaroResult<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let mut session = ProtocolSession::connect(&self.address, self.timeout).await?;
        let db_id = match Self::establish(&mut session, &self.database).await {
            Ok(db_id) => db_id,
            Err(e) => {
                session.close().await;
                session.wait_closed().await;
                return Err(e);
            }
        };

        debug!("Connected to {} database {:?}", self.address, self.database);
        self.session = Some(session);
        self.db_id = Some(db_id);
        Ok(())
    }

    async fn establish(session: &mut ProtocolSession, database: &str) -> FaroResult<u32> {
        session.handshake(CLIENT_ID).await?;
        session.open_database(database, 0, "").await
    }

    /// Execute SQL that returns no rows
    ///
    /// Returns (last_insert_id, rows_affected).
    pub async fn execute(&mut self, sql: &str, params: Vec<Value>) -> FaroResult<(u64, u64)> {
        let (session, db_id) = self.session_mut()?;
        session.exec_sql(db_id, sql, params).await
    }

    /// Execute SQL and collect every result row
    pub async fn fetch(&mut self, sql: &str, params: Vec<Value>) -> FaroResult<QueryResult> {
        let (session, db_id) = self.session_mut()?;
        let (columns, rows) = session.query_sql(db_id, sql, params).await?;
        Ok(QueryResult { columns, rows })
    }

    /// Fetch just the first row, if any
    pub async fn fetch_one(&mut self, sql: &str, params: Vec<Value>) -> FaroResult<Option<Vec<Value>>> {
        let mut result = self.fetch(sql, params).await?;
        if result.rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(result.rows.swap_remove(0)))
        }
    }

    /// Fetch the first column of the first row, if any
    pub async fn fetch_val(&mut self, sql: &str, params: Vec<Value>) -> FaroResult<Option<Value>> {
        let row = self.fetch_one(sql, params).await?;
        Ok(row.and_then(|mut values| {
            if values.is_empty() {
                None
            } else {
                Some(values.swap_remove(0))
            }
        }))
    }

    /// Run a body inside a transaction scope
    ///
    /// The outermost call issues BEGIN before the body and exactly one
    /// COMMIT (on success) or ROLLBACK (on body failure) after it. A
    /// nested call runs the body directly and leaves transaction control
    /// to the outer scope. If COMMIT fails a ROLLBACK is attempted and the
    /// commit error surfaces; if ROLLBACK itself fails, its error wins.
    pub async fn with_transaction<T, F>(&mut self, body: F) -> FaroResult<T>
    where
        F: for<'c> FnOnce(&'c mut ClusterConnection) -> BoxFuture<'c, FaroResult<T>>,
    {
        if self.in_transaction {
            return body(self).await;
        }

        self.execute("BEGIN", vec![]).await?;
        self.in_transaction = true;

        let outcome = body(self).await;
        self.in_transaction = false;

        match outcome {
            Ok(value) => match self.execute("COMMIT", vec![]).await {
                Ok(_) => Ok(value),
                Err(commit_err) => {
                    let _ = self.execute("ROLLBACK", vec![]).await;
                    Err(commit_err)
                }
            },
            Err(body_err) => match self.execute("ROLLBACK", vec![]).await {
                Ok(_) => Err(body_err),
                Err(rollback_err) => Err(rollback_err),
            },
        }
    }

    /// Close the underlying session and invalidate the database handle
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
            session.wait_closed().await;
            debug!("Closed connection to {}", self.address);
        }
        self.db_id = None;
        self.in_transaction = false;
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn session_mut(&mut self) -> FaroResult<(&mut ProtocolSession, u32)> {
        match (self.session.as_mut(), self.db_id) {
            (Some(session), Some(db_id)) => Ok((session, db_id)),
            _ => Err(FaroError::connection("Not connected")),
        }
    }
}
