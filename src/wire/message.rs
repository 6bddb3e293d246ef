/// Typed request and response messages
///
/// Requests always flow client to server and responses server to client,
/// but both directions carry encode and decode so test harnesses can stand
/// in for a server.
use bytes::{Buf, BufMut, BytesMut};

use super::value::{decode_tuple, encode_tuple};
use super::{get_string, get_u64, put_string, Frame, Value, WireError, WORD};

/// Request kind bytes
mod request_kind {
    pub const LEADER: u8 = 0;
    pub const CLIENT: u8 = 1;
    pub const OPEN: u8 = 3;
    pub const PREPARE: u8 = 4;
    pub const FINALIZE: u8 = 7;
    pub const EXEC_SQL: u8 = 8;
    pub const QUERY_SQL: u8 = 9;
}

/// Response kind bytes
mod response_kind {
    pub const FAILURE: u8 = 0;
    pub const LEADER: u8 = 1;
    pub const WELCOME: u8 = 2;
    pub const DB: u8 = 4;
    pub const STMT: u8 = 5;
    pub const RESULT: u8 = 6;
    pub const ROWS: u8 = 7;
    pub const EMPTY: u8 = 8;
}

/// Client-to-server request messages
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Ask the node who it believes the leader is
    Leader,
    /// Register this client, first request after the preamble
    Client { client_id: u64 },
    /// Open a database by name
    Open {
        name: String,
        flags: u64,
        vfs: String,
    },
    /// Prepare a statement for later finalization
    Prepare { db_id: u32, sql: String },
    /// Release a prepared statement
    Finalize { db_id: u32, stmt_id: u32 },
    /// Execute SQL that returns no rows
    ExecSql {
        db_id: u32,
        sql: String,
        params: Vec<Value>,
    },
    /// Execute SQL that returns rows
    QuerySql {
        db_id: u32,
        sql: String,
        params: Vec<Value>,
    },
}

/// Server-to-client response messages
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Server-side failure for the request in flight
    Failure { code: u64, message: String },
    /// Leader report; an empty address means the responding node leads
    Leader { node_id: u64, address: String },
    /// Handshake accepted
    Welcome { heartbeat_timeout: u64 },
    /// Database handle
    Db { db_id: u32 },
    /// Prepared statement handle
    Stmt { stmt_id: u32, num_params: u64 },
    /// Result of a statement without rows
    Result {
        last_insert_id: u64,
        rows_affected: u64,
    },
    /// One chunk of query rows; has_more signals a following chunk
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
        has_more: bool,
    },
    /// Acknowledgement without payload
    Empty,
}

impl Request {
    pub fn kind(&self) -> u8 {
        match self {
            Request::Leader => request_kind::LEADER,
            Request::Client { .. } => request_kind::CLIENT,
            Request::Open { .. } => request_kind::OPEN,
            Request::Prepare { .. } => request_kind::PREPARE,
            Request::Finalize { .. } => request_kind::FINALIZE,
            Request::ExecSql { .. } => request_kind::EXEC_SQL,
            Request::QuerySql { .. } => request_kind::QUERY_SQL,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Request::Leader => "Leader",
            Request::Client { .. } => "Client",
            Request::Open { .. } => "Open",
            Request::Prepare { .. } => "Prepare",
            Request::Finalize { .. } => "Finalize",
            Request::ExecSql { .. } => "ExecSql",
            Request::QuerySql { .. } => "QuerySql",
        }
    }

    /// Encode this request as a complete frame
    pub fn encode(&self) -> Frame {
        let mut body = BytesMut::new();
        match self {
            Request::Leader => {
                body.put_u64_le(0);
            }
            Request::Client { client_id } => {
                body.put_u64_le(*client_id);
            }
            Request::Open { name, flags, vfs } => {
                put_string(&mut body, name);
                body.put_u64_le(*flags);
                put_string(&mut body, vfs);
            }
            Request::Prepare { db_id, sql } => {
                body.put_u64_le(*db_id as u64);
                put_string(&mut body, sql);
            }
            Request::Finalize { db_id, stmt_id } => {
                body.put_u32_le(*db_id);
                body.put_u32_le(*stmt_id);
            }
            Request::ExecSql {
                db_id,
                sql,
                params,
            } => {
                body.put_u64_le(*db_id as u64);
                put_string(&mut body, sql);
                encode_tuple(&mut body, params);
            }
            Request::QuerySql {
                db_id,
                sql,
                params,
            } => {
                body.put_u64_le(*db_id as u64);
                put_string(&mut body, sql);
                encode_tuple(&mut body, params);
            }
        }
        Frame::new(self.kind(), body.freeze())
    }

    /// Decode a request out of a frame
    pub fn decode(frame: &Frame) -> Result<Self, WireError> {
        let mut body = frame.body.clone();
        match frame.kind() {
            request_kind::LEADER => Ok(Request::Leader),
            request_kind::CLIENT => Ok(Request::Client {
                client_id: get_u64(&mut body)?,
            }),
            request_kind::OPEN => {
                let name = get_string(&mut body)?;
                let flags = get_u64(&mut body)?;
                let vfs = get_string(&mut body)?;
                Ok(Request::Open { name, flags, vfs })
            }
            request_kind::PREPARE => {
                let db_id = get_u64(&mut body)? as u32;
                let sql = get_string(&mut body)?;
                Ok(Request::Prepare { db_id, sql })
            }
            request_kind::FINALIZE => {
                if body.remaining() < WORD {
                    return Err(WireError::InvalidFormat(
                        "finalize body truncated".to_string(),
                    ));
                }
                let db_id = body.get_u32_le();
                let stmt_id = body.get_u32_le();
                Ok(Request::Finalize { db_id, stmt_id })
            }
            request_kind::EXEC_SQL => {
                let db_id = get_u64(&mut body)? as u32;
                let sql = get_string(&mut body)?;
                let params = decode_tuple(&mut body)?;
                Ok(Request::ExecSql { db_id, sql, params })
            }
            request_kind::QUERY_SQL => {
                let db_id = get_u64(&mut body)? as u32;
                let sql = get_string(&mut body)?;
                let params = decode_tuple(&mut body)?;
                Ok(Request::QuerySql { db_id, sql, params })
            }
            other => Err(WireError::UnknownRequestKind(other)),
        }
    }
}

impl Response {
    pub fn kind(&self) -> u8 {
        match self {
            Response::Failure { .. } => response_kind::FAILURE,
            Response::Leader { .. } => response_kind::LEADER,
            Response::Welcome { .. } => response_kind::WELCOME,
            Response::Db { .. } => response_kind::DB,
            Response::Stmt { .. } => response_kind::STMT,
            Response::Result { .. } => response_kind::RESULT,
            Response::Rows { .. } => response_kind::ROWS,
            Response::Empty => response_kind::EMPTY,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Response::Failure { .. } => "Failure",
            Response::Leader { .. } => "Leader",
            Response::Welcome { .. } => "Welcome",
            Response::Db { .. } => "Db",
            Response::Stmt { .. } => "Stmt",
            Response::Result { .. } => "Result",
            Response::Rows { .. } => "Rows",
            Response::Empty => "Empty",
        }
    }

    /// Encode this response as a complete frame
    pub fn encode(&self) -> Frame {
        let mut body = BytesMut::new();
        match self {
            Response::Failure { code, message } => {
                body.put_u64_le(*code);
                put_string(&mut body, message);
            }
            Response::Leader { node_id, address } => {
                body.put_u64_le(*node_id);
                put_string(&mut body, address);
            }
            Response::Welcome { heartbeat_timeout } => {
                body.put_u64_le(*heartbeat_timeout);
            }
            Response::Db { db_id } => {
                body.put_u32_le(*db_id);
                body.put_u32_le(0);
            }
            Response::Stmt {
                stmt_id,
                num_params,
            } => {
                body.put_u32_le(*stmt_id);
                body.put_u32_le(0);
                body.put_u64_le(*num_params);
            }
            Response::Result {
                last_insert_id,
                rows_affected,
            } => {
                body.put_u64_le(*last_insert_id);
                body.put_u64_le(*rows_affected);
            }
            Response::Rows {
                columns,
                rows,
                has_more,
            } => {
                body.put_u64_le(*has_more as u64);
                body.put_u64_le(columns.len() as u64);
                for column in columns {
                    put_string(&mut body, column);
                }
                body.put_u64_le(rows.len() as u64);
                for row in rows {
                    encode_tuple(&mut body, row);
                }
            }
            Response::Empty => {
                body.put_u64_le(0);
            }
        }
        Frame::new(self.kind(), body.freeze())
    }

    /// Decode a response out of a frame
    pub fn decode(frame: &Frame) -> Result<Self, WireError> {
        let mut body = frame.body.clone();
        match frame.kind() {
            response_kind::FAILURE => {
                let code = get_u64(&mut body)?;
                let message = get_string(&mut body)?;
                Ok(Response::Failure { code, message })
            }
            response_kind::LEADER => {
                let node_id = get_u64(&mut body)?;
                let address = get_string(&mut body)?;
                Ok(Response::Leader { node_id, address })
            }
            response_kind::WELCOME => Ok(Response::Welcome {
                heartbeat_timeout: get_u64(&mut body)?,
            }),
            response_kind::DB => {
                if body.remaining() < WORD {
                    return Err(WireError::InvalidFormat(
                        "db body truncated".to_string(),
                    ));
                }
                let db_id = body.get_u32_le();
                Ok(Response::Db { db_id })
            }
            response_kind::STMT => {
                if body.remaining() < WORD {
                    return Err(WireError::InvalidFormat(
                        "stmt body truncated".to_string(),
                    ));
                }
                let stmt_id = body.get_u32_le();
                body.advance(4);
                let num_params = get_u64(&mut body)?;
                Ok(Response::Stmt {
                    stmt_id,
                    num_params,
                })
            }
            response_kind::RESULT => {
                let last_insert_id = get_u64(&mut body)?;
                let rows_affected = get_u64(&mut body)?;
                Ok(Response::Result {
                    last_insert_id,
                    rows_affected,
                })
            }
            response_kind::ROWS => {
                let has_more = get_u64(&mut body)? != 0;
                let column_count = get_u64(&mut body)? as usize;
                let mut columns = Vec::with_capacity(column_count.min(1024));
                for _ in 0..column_count {
                    columns.push(get_string(&mut body)?);
                }
                let row_count = get_u64(&mut body)? as usize;
                let mut rows = Vec::with_capacity(row_count.min(1024));
                for _ in 0..row_count {
                    rows.push(decode_tuple(&mut body)?);
                }
                Ok(Response::Rows {
                    columns,
                    rows,
                    has_more,
                })
            }
            response_kind::EMPTY => Ok(Response::Empty),
            other => Err(WireError::UnknownResponseKind(other)),
        }
    }
}
