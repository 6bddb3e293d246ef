//! Scripted mock cluster nodes for unit tests
//!
//! A `MockNode` binds a real loopback listener and serves connections from
//! a script: for each decoded request it plays back the next batch of
//! replies. Tests assert on the requests the node observed.

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::wire::{DecodeBuffer, Frame, Request, Response, PROTOCOL_VERSION};
use bytes::BytesMut;

/// One scripted reaction to an incoming request
#[derive(Debug, Clone)]
pub enum Reply {
    /// Write this response frame
    Send(Response),
    /// Drop the connection immediately
    CloseConnection,
}

/// A scripted node listening on a real loopback socket
pub struct MockNode {
    address: String,
    handle: JoinHandle<Vec<Request>>,
}

impl MockNode {
    /// Serve a single connection: `script[i]` is the batch of replies for
    /// the i-th request on that connection.
    pub async fn start(script: Vec<Vec<Reply>>) -> Self {
        Self::start_serial(vec![script]).await
    }

    /// Serve one connection per script, in accept order.
    pub async fn start_serial(scripts: Vec<Vec<Vec<Reply>>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for script in scripts {
                let (mut stream, _) = listener.accept().await.unwrap();
                serve_connection(&mut stream, script, &mut seen).await;
            }
            seen
        });

        Self { address, handle }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Stop and return every request the node decoded, in arrival order
    pub async fn requests(self) -> Vec<Request> {
        self.handle.await.expect("mock node task panicked")
    }
}

async fn serve_connection(stream: &mut TcpStream, script: Vec<Vec<Reply>>, seen: &mut Vec<Request>) {
    let mut preamble = [0u8; 8];
    if stream.read_exact(&mut preamble).await.is_err() {
        return;
    }
    assert_eq!(
        u64::from_le_bytes(preamble),
        PROTOCOL_VERSION,
        "client sent wrong protocol version"
    );

    let mut decoder = DecodeBuffer::new();
    for batch in script {
        let frame = match read_frame(stream, &mut decoder).await {
            Some(frame) => frame,
            // Client went away; abandon the rest of this connection's script
            None => return,
        };
        seen.push(Request::decode(&frame).expect("mock node: undecodable request"));

        for reply in batch {
            match reply {
                Reply::Send(response) => {
                    let mut out = BytesMut::new();
                    response.encode().encode_into(&mut out);
                    stream.write_all(&out).await.expect("mock node write failed");
                }
                Reply::CloseConnection => return,
            }
        }
    }
}

async fn read_frame(stream: &mut TcpStream, decoder: &mut DecodeBuffer) -> Option<Frame> {
    loop {
        if let Some(frame) = decoder.try_frame().expect("mock node: bad frame") {
            return Some(frame);
        }
        let mut scratch = [0u8; 4096];
        let n = stream.read(&mut scratch).await.ok()?;
        if n == 0 {
            return None;
        }
        decoder.feed(&scratch[..n]);
    }
}

/// An address that refuses connections: bind a listener, note its port,
/// drop it before anyone can connect.
pub async fn reserved_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

/// Paint client logs onto failing test output when RUST_LOG is set
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
