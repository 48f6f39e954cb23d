//! One-shot TCP transport.
//!
//! Outbound, every message gets its own short-lived task: connect, write one
//! line, close. There is no acknowledgement and no retry; a failed send is
//! logged, the target is marked down in the ring, and the message is lost.
//!
//! Inbound, the listener spawns a task per accepted connection that reads a
//! single line, decodes it and hands it to the node.

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::DynamoError;
use crate::message::{Message, read_message, write_message};
use crate::node::Node;
use crate::ring::{HashRing, NodeId};

/// Outbound side: knows every member's address.
pub struct Transport {
    directory: BTreeMap<NodeId, SocketAddr>,
    ring: Arc<HashRing>,
    connect_timeout: Duration,
}

impl Transport {
    pub fn new(
        directory: BTreeMap<NodeId, SocketAddr>,
        ring: Arc<HashRing>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            ring,
            connect_timeout,
        }
    }

    pub fn addr_of(&self, id: &str) -> Option<SocketAddr> {
        self.directory.get(id).copied()
    }

    /// Fire-and-forget send of `message` to member `to`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn send(&self, to: &str, message: &Message) {
        let Some(addr) = self.addr_of(to) else {
            warn!(peer = %to, kind = message.kind(), "no address for peer, dropping message");
            return;
        };

        let to = to.to_string();
        let message = message.clone();
        let ring = Arc::clone(&self.ring);
        let connect_timeout = self.connect_timeout;
        tokio::spawn(async move {
            match deliver(addr, &message, connect_timeout).await {
                Ok(()) => {
                    ring.set_alive(&to, true);
                    debug!(peer = %to, kind = message.kind(), "message sent");
                }
                Err(err) => {
                    ring.set_alive(&to, false);
                    warn!(peer = %to, %addr, kind = message.kind(), error = %err, "failed to send message");
                }
            }
        });
    }
}

/// Opens a connection, writes one line, and closes the write half.
async fn deliver(addr: SocketAddr, message: &Message, connect_timeout: Duration) -> io::Result<()> {
    let mut stream = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
    write_message(&mut stream, message).await?;
    stream.shutdown().await
}

/// Accepts connections until `shutdown` resolves.
pub(crate) async fn serve_until<F>(
    listener: TcpListener,
    node: Arc<Node>,
    read_timeout: Duration,
    shutdown: F,
) where
    F: Future<Output = ()> + Send,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!(node = %node.id(), "listener shutting down");
                break;
            }
            accept_result = listener.accept() => {
                handle_accept_result(accept_result, &node, read_timeout);
            }
        }
    }
}

fn handle_accept_result(
    result: io::Result<(TcpStream, SocketAddr)>,
    node: &Arc<Node>,
    read_timeout: Duration,
) {
    match result {
        Ok((stream, peer)) => {
            let node = Arc::clone(node);
            tokio::spawn(async move {
                match handle_connection(stream, &node, read_timeout).await {
                    Ok(()) => {}
                    Err(DynamoError::Malformed(reason)) => {
                        debug!(%peer, %reason, "dropping malformed message");
                    }
                    Err(err) => warn!(%peer, error = %err, "inbound connection failed"),
                }
            });
        }
        Err(err) => warn!(error = %err, "failed to accept connection"),
    }
}

async fn handle_connection(
    stream: TcpStream,
    node: &Node,
    read_timeout: Duration,
) -> Result<(), DynamoError> {
    let mut reader = BufReader::new(stream);
    let message = timeout(read_timeout, read_message(&mut reader))
        .await
        .map_err(|_| DynamoError::Timeout {
            operation: "inbound read",
            waited: read_timeout,
        })??;

    if let Some(message) = message {
        node.handle_message(message);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncBufReadExt;

    use super::*;
    use crate::store::Record;

    fn ring() -> Arc<HashRing> {
        Arc::new(HashRing::new(["a", "b"]).expect("ring"))
    }

    #[tokio::test]
    async fn send_writes_a_single_line_and_closes() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let directory = BTreeMap::from([("b".to_string(), addr)]);
        let transport = Transport::new(directory, ring(), Duration::from_millis(500));

        transport.send("b", &Message::Insert(Record::new("k", "v")));

        let (stream, _) = timeout(Duration::from_secs(2), listener.accept()).await??;
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        assert_eq!(line, "insert|k:v\n");

        line.clear();
        assert_eq!(reader.read_line(&mut line).await?, 0, "connection closed after one line");
        Ok(())
    }

    #[tokio::test]
    async fn failed_send_marks_member_down() -> anyhow::Result<()> {
        // Bind then drop to get a port nobody listens on.
        let addr = TcpListener::bind("127.0.0.1:0").await?.local_addr()?;
        let ring = ring();
        let directory = BTreeMap::from([("b".to_string(), addr)]);
        let transport = Transport::new(directory, Arc::clone(&ring), Duration::from_millis(200));

        transport.send("b", &Message::Insert(Record::new("k", "v")));

        let index = ring.index_of("b")?;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while ring.member_at(index).is_alive() {
            assert!(tokio::time::Instant::now() < deadline, "member never marked down");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    #[tokio::test]
    async fn unknown_peer_is_ignored() {
        let transport = Transport::new(BTreeMap::new(), ring(), Duration::from_millis(100));
        transport.send("nobody", &Message::Insert(Record::new("k", "v")));
        assert!(transport.addr_of("nobody").is_none());
    }
}
