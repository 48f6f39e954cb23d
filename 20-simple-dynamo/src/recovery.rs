//! Startup reconciliation for a restarted node.
//!
//! A node coming back cannot tell which writes it missed, so it wipes its
//! local table, asks every peer for a full dump, and keeps exactly the records
//! it replicates: those it coordinates, and those coordinated by one of its
//! two predecessors. Everything else is discarded.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{DynamoError, Result};
use crate::mailbox::Wait;
use crate::message::Message;
use crate::node::Node;
use crate::ring::{HashRing, NodeId};
use crate::store::{LocalStore, Record};

/// What a recovery run pulled in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub peers_expected: usize,
    pub peers_answered: usize,
    /// Records written to the local store (the same key may count once per
    /// peer that offered it).
    pub kept: usize,
    pub discarded: usize,
    /// True if the deadline passed before every peer answered; the merge then
    /// used whatever had arrived.
    pub timed_out: bool,
}

impl Node {
    /// Pulls every peer's dump and merges the records this node replicates.
    ///
    /// Marks the node consistent once the merge finishes, whether or not
    /// every peer answered.
    pub(crate) async fn recover(&self) -> Result<RecoveryReport> {
        let my_index = self.ring.index_of(&self.id)?;
        let peers = self.peers();
        let mut session = self.recoveries.open().await;

        let wiped = wipe(self.store.as_ref());
        info!(node = %self.id, wiped, peers = peers.len(), "starting recovery");

        let request = Message::Recover {
            requester: self.id.clone(),
            responder: None,
            records: Vec::new(),
        };
        for peer in &peers {
            self.transport.send(peer, &request);
        }

        let mut dumps: Vec<Option<Vec<Record>>> = vec![None; self.ring.len()];
        let mut report = RecoveryReport {
            peers_expected: peers.len(),
            ..RecoveryReport::default()
        };
        let deadline = Instant::now() + self.tuning.recovery_timeout;
        let mut shutdown = self.shutdown.clone();
        while report.peers_answered < report.peers_expected {
            match session.recv_until(deadline, &mut shutdown).await {
                Wait::Item((responder, records)) => match self.ring.index_of(&responder) {
                    Ok(index) if index != my_index && dumps[index].is_none() => {
                        debug!(node = %self.id, peer = %responder, records = records.len(), "recovery dump received");
                        dumps[index] = Some(records);
                        report.peers_answered += 1;
                    }
                    _ => debug!(node = %self.id, peer = %responder, "ignoring duplicate or foreign recovery dump"),
                },
                Wait::Deadline => {
                    warn!(
                        node = %self.id,
                        answered = report.peers_answered,
                        expected = report.peers_expected,
                        "recovery timed out, merging partial data"
                    );
                    report.timed_out = true;
                    break;
                }
                Wait::Shutdown => return Err(DynamoError::ShuttingDown),
            }
        }

        let (kept, discarded) = merge_recovered(&self.ring, &self.id, &dumps, self.store.as_ref())?;
        report.kept = kept;
        report.discarded = discarded;
        self.mark_consistent();
        info!(node = %self.id, kept, discarded, "recovery complete");
        Ok(report)
    }

    /// `recover` from the wire: a peer's dump if we asked, otherwise a request
    /// to answer with our own records.
    pub(crate) fn on_recover(
        &self,
        requester: NodeId,
        responder: Option<NodeId>,
        records: Vec<Record>,
    ) {
        if requester == self.id {
            match responder {
                Some(responder) => {
                    if !self.recoveries.deliver((responder, records)) {
                        debug!(node = %self.id, "recovery dump arrived with no recovery running");
                    }
                }
                None => debug!(node = %self.id, "ignoring own recovery request"),
            }
            return;
        }
        if responder.is_some() {
            debug!(node = %self.id, %requester, "ignoring recovery dump addressed elsewhere");
            return;
        }

        self.transport.send(
            &requester,
            &Message::Recover {
                requester: requester.clone(),
                responder: Some(self.id.clone()),
                records: self.store.scan_all(),
            },
        );
    }
}

/// Writes every offered record that `me` replicates into `store`, skipping
/// `me`'s own slot. Returns `(kept, discarded)`.
pub fn merge_recovered(
    ring: &HashRing,
    me: &str,
    dumps: &[Option<Vec<Record>>],
    store: &dyn LocalStore,
) -> Result<(usize, usize)> {
    let my_index = ring.index_of(me)?;
    let mut kept = 0;
    let mut discarded = 0;
    for (index, dump) in dumps.iter().enumerate() {
        if index == my_index {
            continue;
        }
        for record in dump.iter().flatten() {
            if ring.owns_replica(me, &record.key)? {
                store.replace(record.key.clone(), record.value.clone());
                kept += 1;
            } else {
                discarded += 1;
            }
        }
    }
    Ok((kept, discarded))
}

fn wipe(store: &dyn LocalStore) -> usize {
    store
        .scan_all()
        .iter()
        .map(|record| store.delete(&record.key))
        .sum()
}
