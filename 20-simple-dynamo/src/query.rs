//! Read path and global dump.
//!
//! A read first consults the local store. On a miss it asks the key's other
//! replicas and, with the default read quorum of 1, commits to the first reply
//! whose key matches: a "not found" reply wins just as a value would. Larger
//! quorums wait for that many matching replies and return the first value seen
//! among them.
//!
//! A global dump gathers every peer's local records and merges them with this
//! node's, keeping the first copy seen of each key.

use std::collections::HashSet;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{DynamoError, Result};
use crate::mailbox::Wait;
use crate::message::{Message, QueryPayload};
use crate::node::Node;
use crate::ring::NodeId;
use crate::store::Record;

impl Node {
    /// Looks `key` up locally, then on its replicas.
    ///
    /// `Ok(None)` means a replica answered "not found". `Err(Timeout)` means
    /// too few replicas answered before the query deadline.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(value) = self.store.get(key) {
            return Ok(Some(value));
        }

        // This node already missed, so only the other replicas are asked.
        let targets: Vec<NodeId> = self
            .ring
            .replicas_for(key)
            .into_iter()
            .filter(|target| **target != self.id)
            .cloned()
            .collect();
        if targets.is_empty() {
            return Ok(None);
        }
        let needed = self.tuning.read_quorum.min(targets.len());

        let mut session = self.queries.open().await;
        let request = Message::Query {
            requester: self.id.clone(),
            payload: QueryPayload::Key(key.to_string()),
        };
        debug!(node = %self.id, key, ?targets, needed, "local miss, querying replicas");
        for target in &targets {
            self.transport.send(target, &request);
        }

        let deadline = Instant::now() + self.tuning.query_timeout;
        let mut shutdown = self.shutdown.clone();
        let mut answers = 0;
        let mut found = None;
        while answers < needed {
            match session.recv_until(deadline, &mut shutdown).await {
                Wait::Item(payload) if payload.key() != key => {
                    debug!(node = %self.id, expected = key, got = payload.key(), "discarding mismatched reply");
                }
                Wait::Item(payload) => {
                    answers += 1;
                    if found.is_none() {
                        found = payload.into_value();
                    }
                }
                Wait::Deadline => {
                    warn!(node = %self.id, key, answers, needed, "query timed out");
                    return Err(DynamoError::Timeout {
                        operation: "query",
                        waited: self.tuning.query_timeout,
                    });
                }
                Wait::Shutdown => return Err(DynamoError::ShuttingDown),
            }
        }
        Ok(found)
    }

    /// Collects every member's records and merges them, first copy of each
    /// key wins (this node's own records come first).
    ///
    /// Succeeds with a partial merge if the deadline passes after all but
    /// `tolerated_failures` peers have answered.
    pub async fn dump_all(&self) -> Result<Vec<Record>> {
        let peers = self.peers();
        let mut session = self.dumps.open().await;

        let mut slots = Vec::with_capacity(peers.len() + 1);
        slots.push(self.store.scan_all());

        let request = Message::GlobalQuery {
            requester: self.id.clone(),
            records: Vec::new(),
        };
        for peer in &peers {
            self.transport.send(peer, &request);
        }

        let expected = peers.len();
        let required = expected.saturating_sub(self.tuning.tolerated_failures);
        let deadline = Instant::now() + self.tuning.gather_timeout;
        let mut shutdown = self.shutdown.clone();
        while slots.len() - 1 < expected {
            match session.recv_until(deadline, &mut shutdown).await {
                Wait::Item(records) => slots.push(records),
                Wait::Deadline => {
                    let answered = slots.len() - 1;
                    if answered < required {
                        warn!(node = %self.id, answered, expected, "global dump timed out");
                        return Err(DynamoError::Timeout {
                            operation: "global dump",
                            waited: self.tuning.gather_timeout,
                        });
                    }
                    warn!(node = %self.id, answered, expected, "global dump proceeding without all peers");
                    break;
                }
                Wait::Shutdown => return Err(DynamoError::ShuttingDown),
            }
        }

        let merged = merge_first_seen(slots);
        info!(node = %self.id, records = merged.len(), "global dump complete");
        Ok(merged)
    }

    /// `query` from the wire: a reply if we asked, otherwise a lookup to
    /// answer. A node still recovering stays silent rather than report a
    /// miss from its half-filled store.
    pub(crate) fn on_query(&self, requester: NodeId, payload: QueryPayload) {
        if requester == self.id {
            if !self.queries.deliver(payload) {
                debug!(node = %self.id, "query reply arrived with no read outstanding");
            }
            return;
        }
        if !self.is_consistent() {
            debug!(node = %self.id, %requester, "not answering query while recovering");
            return;
        }

        let key = payload.key();
        let reply = match self.store.get(key) {
            Some(value) => QueryPayload::Found(Record::new(key, value)),
            None => QueryPayload::Key(key.to_string()),
        };
        self.transport.send(
            &requester,
            &Message::Query {
                requester: requester.clone(),
                payload: reply,
            },
        );
    }

    /// `globalQuery` from the wire: a peer's dump if we asked, otherwise a
    /// request to answer with our own records (unless still recovering).
    pub(crate) fn on_global_query(&self, requester: NodeId, records: Vec<Record>) {
        if requester == self.id {
            if !self.dumps.deliver(records) {
                debug!(node = %self.id, "dump reply arrived with no dump outstanding");
            }
            return;
        }
        if !self.is_consistent() {
            debug!(node = %self.id, %requester, "not answering dump while recovering");
            return;
        }

        self.transport.send(
            &requester,
            &Message::GlobalQuery {
                requester: requester.clone(),
                records: self.store.scan_all(),
            },
        );
    }
}

/// Concatenates `slots` in order and keeps the first record for each key.
pub fn merge_first_seen<I>(slots: I) -> Vec<Record>
where
    I: IntoIterator<Item = Vec<Record>>,
{
    let mut seen = HashSet::new();
    slots
        .into_iter()
        .flatten()
        .filter(|record| seen.insert(record.key.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    use super::*;
    use crate::node::testing::*;

    #[test]
    fn merge_keeps_first_copy_of_each_key() {
        let merged = merge_first_seen(vec![
            vec![Record::new("a", "mine"), Record::new("b", "mine")],
            Vec::new(),
            vec![Record::new("b", "peer"), Record::new("c", "peer")],
            vec![Record::new("c", "late")],
        ]);
        assert_eq!(
            merged,
            vec![
                Record::new("a", "mine"),
                Record::new("b", "mine"),
                Record::new("c", "peer"),
            ]
        );
    }

    #[tokio::test]
    async fn local_hit_skips_network() {
        let (node, _shutdown) = isolated_node("5554", &CLASSIC);
        node.store.put("anything".into(), "here".into());
        assert_eq!(node.get("anything").await.unwrap().as_deref(), Some("here"));
    }

    #[tokio::test]
    async fn miss_times_out_when_no_replica_answers() {
        let (mut node, _shutdown) = isolated_node("5554", &CLASSIC);
        node.tuning.query_timeout = Duration::from_millis(100);

        let err = node.get("missing").await.unwrap_err();
        assert!(err.is_timeout(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn single_member_ring_reports_not_found() {
        let (node, _shutdown) = isolated_node("solo", &["solo"]);
        assert_eq!(node.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn first_matching_reply_wins() {
        let (node, _shutdown) = isolated_node("5554", &CLASSIC);
        let node = std::sync::Arc::new(node);
        let key = key_where(&node, "5554", false);

        let reader = {
            let node = std::sync::Arc::clone(&node);
            let key = key.clone();
            tokio::spawn(async move { node.get(&key).await })
        };

        // Stand in for the replicas: a stale reply for another key, then the
        // real answer, then a late contradicting one.
        tokio::time::sleep(Duration::from_millis(50)).await;
        node.handle_message(Message::Query {
            requester: "5554".into(),
            payload: QueryPayload::Found(Record::new("other", "nope")),
        });
        node.handle_message(Message::Query {
            requester: "5554".into(),
            payload: QueryPayload::Found(Record::new(key.clone(), "v1")),
        });
        node.handle_message(Message::Query {
            requester: "5554".into(),
            payload: QueryPayload::Key(key.clone()),
        });

        let value = reader.await.expect("reader task").expect("read succeeds");
        assert_eq!(value.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn not_found_reply_wins_if_first() {
        let (node, _shutdown) = isolated_node("5554", &CLASSIC);
        let node = std::sync::Arc::new(node);
        let key = key_where(&node, "5554", false);

        let reader = {
            let node = std::sync::Arc::clone(&node);
            let key = key.clone();
            tokio::spawn(async move { node.get(&key).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        node.handle_message(Message::Query {
            requester: "5554".into(),
            payload: QueryPayload::Key(key.clone()),
        });

        assert_eq!(reader.await.expect("reader task").expect("read succeeds"), None);
    }

    #[tokio::test]
    async fn quorum_of_two_waits_for_second_reply() {
        let (mut node, _shutdown) = isolated_node("5554", &CLASSIC);
        node.tuning.read_quorum = 2;
        node.tuning.query_timeout = Duration::from_millis(300);
        let node = std::sync::Arc::new(node);
        let key = key_where(&node, "5554", false);

        let reader = {
            let node = std::sync::Arc::clone(&node);
            let key = key.clone();
            tokio::spawn(async move { node.get(&key).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        node.handle_message(Message::Query {
            requester: "5554".into(),
            payload: QueryPayload::Key(key.clone()),
        });
        node.handle_message(Message::Query {
            requester: "5554".into(),
            payload: QueryPayload::Found(Record::new(key.clone(), "late-but-found")),
        });

        let value = reader.await.expect("reader task").expect("read succeeds");
        assert_eq!(value.as_deref(), Some("late-but-found"));
    }

    #[tokio::test]
    async fn dump_tolerates_one_missing_peer() {
        let (mut node, _shutdown) = isolated_node("5554", &CLASSIC);
        node.tuning.gather_timeout = Duration::from_millis(200);
        node.store.put("mine".into(), "1".into());
        let node = std::sync::Arc::new(node);

        let dumper = {
            let node = std::sync::Arc::clone(&node);
            tokio::spawn(async move { node.dump_all().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        for peer_records in [
            vec![Record::new("mine", "stale"), Record::new("a", "1")],
            Vec::new(),
            vec![Record::new("b", "2")],
        ] {
            node.handle_message(Message::GlobalQuery {
                requester: "5554".into(),
                records: peer_records,
            });
        }

        let merged = dumper.await.expect("dump task").expect("dump succeeds");
        assert_eq!(
            merged,
            vec![
                Record::new("mine", "1"),
                Record::new("a", "1"),
                Record::new("b", "2"),
            ]
        );
    }

    #[tokio::test]
    async fn dump_fails_when_too_many_peers_are_silent() {
        let (mut node, _shutdown) = isolated_node("5554", &CLASSIC);
        node.tuning.gather_timeout = Duration::from_millis(100);

        let err = node.dump_all().await.unwrap_err();
        assert!(err.is_timeout(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn shutdown_cancels_outstanding_read() {
        let (node, shutdown) = isolated_node("5554", &CLASSIC);
        let node = std::sync::Arc::new(node);
        let key = key_where(&node, "5554", false);

        let reader = {
            let node = std::sync::Arc::clone(&node);
            tokio::spawn(async move { node.get(&key).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.send(true).expect("node still listening for shutdown");

        let err = reader.await.expect("reader task").unwrap_err();
        assert!(matches!(err, DynamoError::ShuttingDown));
    }

    #[tokio::test]
    async fn recovering_node_stays_silent_until_consistent() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let directory = BTreeMap::from([("5556".to_string(), listener.local_addr()?)]);
        let (node, _shutdown) = wired_node("5554", &CLASSIC, directory);
        node.store.put("k".into(), "v".into());

        let request = || Message::Query {
            requester: "5556".into(),
            payload: QueryPayload::Key("k".into()),
        };
        node.handle_message(request());
        node.handle_message(Message::GlobalQuery {
            requester: "5556".into(),
            records: Vec::new(),
        });
        let silent = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(silent.is_err(), "no reply while recovering");

        node.mark_consistent();
        node.handle_message(request());
        let (stream, _) = tokio::time::timeout(Duration::from_secs(2), listener.accept()).await??;
        let mut line = String::new();
        tokio::io::BufReader::new(stream).read_line(&mut line).await?;
        assert_eq!(line, "query|5556|k:v\n");
        Ok(())
    }

    #[tokio::test]
    async fn dump_replies_between_sessions_are_dropped() {
        let (mut node, _shutdown) = isolated_node("5554", &CLASSIC);
        node.tuning.gather_timeout = Duration::from_millis(100);
        node.tuning.tolerated_failures = 4;

        assert!(node.dump_all().await.unwrap().is_empty());
        // Nothing is open now, so a straggler cannot reach the next dump.
        assert!(!node.dumps.deliver(vec![Record::new("late", "1")]));
        assert!(node.dump_all().await.unwrap().is_empty());
    }
}
