//! Node spawning and the caller-facing handle.
//!
//! [`spawn_node`] binds the listener, starts the accept loop, and (on a
//! restart) runs recovery before handing back a [`NodeHandle`]. The handle is
//! the only way callers reach a running node; dropping it without calling
//! [`NodeHandle::shutdown`] leaves the listener running until the runtime
//! stops.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::boot::StartupMode;
use crate::config::NodeConfig;
use crate::error::DynamoError;
use crate::node::{Node, NodeStatus};
use crate::recovery::RecoveryReport;
use crate::ring::{HashRing, NodeId};
use crate::store::{LocalStore, MemoryStore, Record};
use crate::transport::{Transport, serve_until};

/// A running ring member.
pub struct NodeHandle {
    node: Arc<Node>,
    shutdown_tx: watch::Sender<bool>,
    server: JoinHandle<()>,
    local_addr: SocketAddr,
    recovery: Option<RecoveryReport>,
}

impl NodeHandle {
    pub fn id(&self) -> &NodeId {
        self.node.id()
    }

    /// Address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.node.put(key, value)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, DynamoError> {
        self.node.get(key).await
    }

    pub fn delete(&self, key: &str) -> usize {
        self.node.delete(key)
    }

    pub async fn dump_all(&self) -> Result<Vec<Record>, DynamoError> {
        self.node.dump_all().await
    }

    pub fn local_dump(&self) -> Vec<Record> {
        self.node.local_dump()
    }

    pub fn local_get(&self, key: &str) -> Option<String> {
        self.node.local_get(key)
    }

    pub fn status(&self) -> NodeStatus {
        self.node.status()
    }

    pub fn ring(&self) -> &HashRing {
        self.node.ring()
    }

    /// Outcome of startup recovery, if this start was a restart.
    pub fn recovery(&self) -> Option<&RecoveryReport> {
        self.recovery.as_ref()
    }

    /// Stops the listener and cancels any outstanding read, dump or recovery.
    pub async fn shutdown(self) -> Result<()> {
        info!(node = %self.node.id(), "shutting down");
        // Err only means nothing is listening any more.
        let _ = self.shutdown_tx.send(true);
        self.server.await.context("listener task panicked")
    }
}

/// Binds `config.listen_addr` and starts a node backed by an in-memory store.
pub async fn spawn_node(config: NodeConfig) -> Result<NodeHandle> {
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    spawn_node_with(listener, config, Arc::new(MemoryStore::new())).await
}

/// Starts a node on an already-bound listener with the given store.
///
/// On [`StartupMode::Restart`] this returns only after recovery has merged
/// whatever peers sent back, so the node is consistent before any caller
/// operation runs.
pub async fn spawn_node_with(
    listener: TcpListener,
    config: NodeConfig,
    store: Arc<dyn LocalStore>,
) -> Result<NodeHandle> {
    config.validate()?;
    let local_addr = listener
        .local_addr()
        .context("listener has no local address")?;

    let ring = Arc::new(HashRing::new(config.peers.keys().cloned())?);
    let transport = Transport::new(
        config.peers.clone(),
        Arc::clone(&ring),
        config.tuning.connect_timeout,
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let node = Arc::new(Node::new(
        config.id.clone(),
        ring,
        store,
        transport,
        config.tuning.clone(),
        shutdown_rx.clone(),
    ));

    let server = {
        let node = Arc::clone(&node);
        let read_timeout = config.tuning.read_timeout;
        let mut shutdown_rx = shutdown_rx;
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.wait_for(|stopped| *stopped).await;
            };
            serve_until(listener, node, read_timeout, shutdown).await;
        })
    };
    info!(node = %config.id, %local_addr, members = config.peers.len(), startup = ?config.startup, "node listening");

    let recovery = match config.startup {
        StartupMode::FirstBoot => {
            node.mark_consistent();
            None
        }
        StartupMode::Restart => match node.recover().await {
            Ok(report) => Some(report),
            Err(err) => {
                warn!(node = %config.id, error = %err, "recovery aborted");
                let _ = shutdown_tx.send(true);
                let _ = server.await;
                return Err(err).context("recovery failed");
            }
        },
    };

    Ok(NodeHandle {
        node,
        shutdown_tx,
        server,
        local_addr,
        recovery,
    })
}
