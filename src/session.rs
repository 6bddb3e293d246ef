/// Protocol session over one physical connection
///
/// The wire protocol is strictly synchronous: one request goes out, one
/// response (or a chunked row stream) comes back, nothing overlaps. The
/// session takes `&mut self` on every operation, so exclusive ownership of
/// the handle is what enforces the one-outstanding-request rule.
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{FaroError, FaroResult};
use crate::wire::{DecodeBuffer, Request, Response, Value, PROTOCOL_VERSION};

/// Read chunk size for the response loop
const READ_BUF_LEN: usize = 4096;

/// A client session on a single TCP connection to one node
#[derive(Debug)]
pub struct ProtocolSession {
    stream: Option<TcpStream>,
    decoder: DecodeBuffer,
    client_id: u64,
    heartbeat_timeout: u64,
}

impl ProtocolSession {
    /// Open a TCP connection to a node, bounded by the connect timeout
    pub async fn connect(address: &str, connect_timeout: Duration) -> FaroResult<Self> {
        debug!("Connecting to {}", address);

        let stream = match timeout(connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(FaroError::connection(format!(
                    "Failed to connect to {}: {}",
                    address, e
                )))
            }
            Err(_) => {
                return Err(FaroError::connection(format!(
                    "Connection to {} timed out",
                    address
                )))
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", address, e);
        }

        Ok(Self {
            stream: Some(stream),
            decoder: DecodeBuffer::new(),
            client_id: 0,
            heartbeat_timeout: 0,
        })
    }

    /// Perform the protocol handshake: version preamble, then client
    /// registration. Returns the heartbeat timeout granted by the server.
    pub async fn handshake(&mut self, client_id: u64) -> FaroResult<u64> {
        let stream = self.stream_mut()?;
        stream.write_all(&PROTOCOL_VERSION.to_le_bytes()).await?;

        match self.round_trip(&Request::Client { client_id }).await? {
            Response::Welcome { heartbeat_timeout } => {
                self.client_id = client_id;
                self.heartbeat_timeout = heartbeat_timeout;
                debug!(
                    "Handshake complete, client {} heartbeat {}ms",
                    client_id, heartbeat_timeout
                );
                Ok(heartbeat_timeout)
            }
            Response::Failure { message, .. } => Err(FaroError::protocol(format!(
                "Handshake failed: {}",
                message
            ))),
            other => Err(FaroError::protocol(format!(
                "Expected Welcome response, got {}",
                other.kind_name()
            ))),
        }
    }

    /// Ask this node who leads the cluster
    ///
    /// An empty address means the responding node is itself the leader;
    /// substituting the probed address is the caller's job.
    pub async fn get_leader(&mut self) -> FaroResult<(u64, String)> {
        match self.round_trip(&Request::Leader).await? {
            Response::Leader { node_id, address } => Ok((node_id, address)),
            Response::Failure { code, message } => {
                Err(FaroError::Operational { code, message })
            }
            other => Err(FaroError::protocol(format!(
                "Expected Leader response, got {}",
                other.kind_name()
            ))),
        }
    }

    /// Open a database on this node, returning its handle
    pub async fn open_database(&mut self, name: &str, flags: u64, vfs: &str) -> FaroResult<u32> {
        let request = Request::Open {
            name: name.to_string(),
            flags,
            vfs: vfs.to_string(),
        };
        match self.round_trip(&request).await? {
            Response::Db { db_id } => Ok(db_id),
            Response::Failure { code, message } => {
                Err(FaroError::Operational { code, message })
            }
            other => Err(FaroError::protocol(format!(
                "Expected Db response, got {}",
                other.kind_name()
            ))),
        }
    }

    /// Prepare a statement, returning its handle and parameter count
    pub async fn prepare(&mut self, db_id: u32, sql: &str) -> FaroResult<(u32, u64)> {
        let request = Request::Prepare {
            db_id,
            sql: sql.to_string(),
        };
        match self.round_trip(&request).await? {
            Response::Stmt {
                stmt_id,
                num_params,
            } => Ok((stmt_id, num_params)),
            Response::Failure { code, message } => {
                Err(FaroError::Operational { code, message })
            }
            other => Err(FaroError::protocol(format!(
                "Expected Stmt response, got {}",
                other.kind_name()
            ))),
        }
    }

    /// Release a prepared statement
    ///
    /// Any non-failure acknowledgement counts as success.
    pub async fn finalize(&mut self, db_id: u32, stmt_id: u32) -> FaroResult<()> {
        match self
            .round_trip(&Request::Finalize { db_id, stmt_id })
            .await?
        {
            Response::Failure { code, message } => {
                Err(FaroError::Operational { code, message })
            }
            _ => Ok(()),
        }
    }

    /// Execute SQL that returns no rows
    pub async fn exec_sql(
        &mut self,
        db_id: u32,
        sql: &str,
        params: Vec<Value>,
    ) -> FaroResult<(u64, u64)> {
        let request = Request::ExecSql {
            db_id,
            sql: sql.to_string(),
            params,
        };
        match self.round_trip(&request).await? {
            Response::Result {
                last_insert_id,
                rows_affected,
            } => Ok((last_insert_id, rows_affected)),
            Response::Failure { code, message } => {
                Err(FaroError::Operational { code, message })
            }
            other => Err(FaroError::protocol(format!(
                "Expected Result response, got {}",
                other.kind_name()
            ))),
        }
    }

    /// Execute SQL that returns rows, concatenating chunked responses
    ///
    /// Column names are fixed by the first chunk. Rows from follow-up
    /// chunks are appended in arrival order until a chunk arrives without
    /// the has_more flag.
    pub async fn query_sql(
        &mut self,
        db_id: u32,
        sql: &str,
        params: Vec<Value>,
    ) -> FaroResult<(Vec<String>, Vec<Vec<Value>>)> {
        let request = Request::QuerySql {
            db_id,
            sql: sql.to_string(),
            params,
        };
        let (columns, mut rows, mut has_more) = match self.round_trip(&request).await? {
            Response::Rows {
                columns,
                rows,
                has_more,
            } => (columns, rows, has_more),
            Response::Failure { code, message } => {
                return Err(FaroError::Operational { code, message })
            }
            other => {
                return Err(FaroError::protocol(format!(
                    "Expected Rows response, got {}",
                    other.kind_name()
                )))
            }
        };

        while has_more {
            match self.read_response().await? {
                Response::Rows {
                    rows: chunk,
                    has_more: more,
                    ..
                } => {
                    rows.extend(chunk);
                    has_more = more;
                }
                // A non-Rows continuation ends the stream
                _ => break,
            }
        }

        Ok((columns, rows))
    }

    /// Shut down the write half, best effort
    pub async fn close(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            let _ = stream.shutdown().await;
        }
    }

    /// Release the socket; the session cannot be used afterwards
    pub async fn wait_closed(&mut self) {
        self.stream.take();
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    pub fn heartbeat_timeout(&self) -> u64 {
        self.heartbeat_timeout
    }

    /// Send one request and read its response
    async fn round_trip(&mut self, request: &Request) -> FaroResult<Response> {
        self.send(request).await?;
        self.read_response().await
    }

    async fn send(&mut self, request: &Request) -> FaroResult<()> {
        let mut out = BytesMut::new();
        request.encode().encode_into(&mut out);

        let stream = self.stream_mut()?;
        stream.write_all(&out).await?;
        Ok(())
    }

    /// Read from the socket until one complete response decodes
    async fn read_response(&mut self) -> FaroResult<Response> {
        loop {
            if let Some(frame) = self
                .decoder
                .try_frame()
                .map_err(|e| FaroError::protocol(e.to_string()))?
            {
                return Response::decode(&frame).map_err(|e| FaroError::protocol(e.to_string()));
            }

            let stream = self.stream_mut()?;
            let mut scratch = [0u8; READ_BUF_LEN];
            let n = stream.read(&mut scratch).await?;
            if n == 0 {
                return Err(FaroError::connection("Connection closed by server"));
            }
            self.decoder.feed(&scratch[..n]);
        }
    }

    fn stream_mut(&mut self) -> FaroResult<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| FaroError::connection("Not connected"))
    }
}
