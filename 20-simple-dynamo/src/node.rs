//! A ring member: shared state plus inbound message dispatch.
//!
//! The caller-facing operations live next to the protocol they drive:
//! writes and deletes in [`crate::replication`], reads and global dumps in
//! [`crate::query`], startup reconciliation in [`crate::recovery`]. Each of
//! those modules also holds the replica-side handler for its message kinds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::debug;

use crate::config::Tuning;
use crate::mailbox::Mailbox;
use crate::message::{Message, QueryPayload};
use crate::ring::{HashRing, NodeId};
use crate::store::{LocalStore, Record};
use crate::transport::Transport;

pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) ring: Arc<HashRing>,
    pub(crate) store: Arc<dyn LocalStore>,
    pub(crate) transport: Transport,
    pub(crate) tuning: Tuning,
    /// Replies to an outstanding read miss.
    pub(crate) queries: Mailbox<QueryPayload>,
    /// Peer dumps for an outstanding global dump.
    pub(crate) dumps: Mailbox<Vec<Record>>,
    /// Peer dumps for recovery, tagged with the responder.
    pub(crate) recoveries: Mailbox<(NodeId, Vec<Record>)>,
    pub(crate) shutdown: watch::Receiver<bool>,
    consistent: AtomicBool,
}

/// Snapshot returned by [`Node::status`].
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub id: NodeId,
    pub consistent: bool,
    pub members: Vec<MemberStatus>,
    pub stored: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberStatus {
    pub id: NodeId,
    pub hash: String,
    pub alive: bool,
}

impl Node {
    pub(crate) fn new(
        id: NodeId,
        ring: Arc<HashRing>,
        store: Arc<dyn LocalStore>,
        transport: Transport,
        tuning: Tuning,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            ring,
            store,
            transport,
            tuning,
            queries: Mailbox::new(),
            dumps: Mailbox::new(),
            recoveries: Mailbox::new(),
            shutdown,
            consistent: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    /// True once startup reconciliation (if any) has finished.
    pub fn is_consistent(&self) -> bool {
        self.consistent.load(Ordering::Acquire)
    }

    pub(crate) fn mark_consistent(&self) {
        self.consistent.store(true, Ordering::Release);
    }

    /// This node's own records, without touching the network.
    pub fn local_dump(&self) -> Vec<Record> {
        self.store.scan_all()
    }

    pub fn local_get(&self, key: &str) -> Option<String> {
        self.store.get(key)
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            id: self.id.clone(),
            consistent: self.is_consistent(),
            members: self
                .ring
                .members()
                .iter()
                .map(|member| MemberStatus {
                    id: member.id().clone(),
                    hash: member.hash().to_string(),
                    alive: member.is_alive(),
                })
                .collect(),
            stored: self.store.len(),
        }
    }

    /// Members other than this node, in ring order.
    pub(crate) fn peers(&self) -> Vec<NodeId> {
        self.ring
            .members()
            .iter()
            .map(|member| member.id())
            .filter(|id| **id != self.id)
            .cloned()
            .collect()
    }

    /// Entry point for every decoded inbound line.
    pub(crate) fn handle_message(&self, message: Message) {
        debug!(node = %self.id, kind = message.kind(), "received message");
        match message {
            Message::Insert(record) => self.on_insert(record),
            Message::Delete { requester, key } => self.on_delete(&requester, &key),
            Message::Query { requester, payload } => self.on_query(requester, payload),
            Message::GlobalQuery { requester, records } => {
                self.on_global_query(requester, records)
            }
            Message::Recover {
                requester,
                responder,
                records,
            } => self.on_recover(requester, responder, records),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::*;
    use crate::store::MemoryStore;

    /// A node whose transport knows no addresses, so every remote send is
    /// dropped. Enough to exercise local effects and handlers.
    pub(crate) fn isolated_node(id: &str, members: &[&str]) -> (Node, watch::Sender<bool>) {
        wired_node(id, members, BTreeMap::new())
    }

    /// Like [`isolated_node`], but sends to the addresses in `directory`.
    pub(crate) fn wired_node(
        id: &str,
        members: &[&str],
        directory: BTreeMap<NodeId, std::net::SocketAddr>,
    ) -> (Node, watch::Sender<bool>) {
        let ring = Arc::new(HashRing::new(members.iter().copied()).expect("valid ring"));
        let transport = Transport::new(directory, Arc::clone(&ring), Duration::from_millis(100));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let node = Node::new(
            id.to_string(),
            ring,
            Arc::new(MemoryStore::new()),
            transport,
            Tuning::default(),
            shutdown_rx,
        );
        (node, shutdown_tx)
    }

    pub(crate) const CLASSIC: [&str; 5] = ["5554", "5556", "5558", "5560", "5562"];

    /// First generated key whose replica set includes (or excludes) `id`.
    pub(crate) fn key_where(node: &Node, id: &str, replicated: bool) -> String {
        (0..10_000)
            .map(|i| format!("key{i}"))
            .find(|key| node.ring.replicas_for(key).iter().any(|r| *r == id) == replicated)
            .expect("some key matches")
    }

    /// First generated key coordinated by `id`.
    pub(crate) fn key_coordinated_by(node: &Node, id: &str) -> String {
        (0..10_000)
            .map(|i| format!("key{i}"))
            .find(|key| node.ring.coordinator_for(key) == id)
            .expect("some key matches")
    }
}
