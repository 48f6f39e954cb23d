//! Static consistent-hashing ring.
//!
//! Node identifiers and keys are hashed into the same 160-bit space (SHA-1,
//! lowercase hex). Members are kept sorted by hash; a key belongs to the first
//! member whose hash is at or after the key's hash, wrapping to the lowest
//! member. The coordinator and its next two members clockwise form the key's
//! replica set.
//!
//! The ring is built once from configuration and never changes size. Each
//! member carries an `alive` flag that the transport updates as sends succeed
//! or fail; routing ignores it and always targets the full replica set.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use sha1::{Digest, Sha1};

use crate::error::{DynamoError, Result};

/// Opaque node identifier, e.g. `"5554"`.
pub type NodeId = String;

/// Coordinator plus two successors.
pub const REPLICATION_FACTOR: usize = 3;

/// Hashes a node id or a key into the ring's 160-bit space.
///
/// The digest is rendered as 40 lowercase hex characters, so plain string
/// comparison matches numeric order.
pub fn hash_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct RingMember {
    id: NodeId,
    hash: String,
    alive: AtomicBool,
}

impl RingMember {
    fn new(id: NodeId) -> Self {
        let hash = hash_hex(&id);
        Self {
            id,
            hash,
            alive: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for RingMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingMember")
            .field("id", &self.id)
            .field("hash", &self.hash)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Fixed ring of members sorted ascending by hash.
#[derive(Debug)]
pub struct HashRing {
    members: Vec<RingMember>,
}

impl HashRing {
    pub fn new<I>(ids: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<NodeId>,
    {
        let mut seen = HashSet::new();
        let mut members = Vec::new();
        for id in ids {
            let id = id.into();
            if !seen.insert(id.clone()) {
                return Err(DynamoError::DuplicateMember(id));
            }
            members.push(RingMember::new(id));
        }
        if members.is_empty() {
            return Err(DynamoError::EmptyRing);
        }
        members.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(Self { members })
    }

    /// Members in ring order (ascending hash).
    pub fn members(&self) -> &[RingMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Ring position of `id`.
    pub fn index_of(&self, id: &str) -> Result<usize> {
        self.members
            .iter()
            .position(|member| member.id == id)
            .ok_or_else(|| DynamoError::UnknownMember(id.to_string()))
    }

    pub fn member_at(&self, index: usize) -> &RingMember {
        &self.members[index % self.members.len()]
    }

    /// Member responsible for `key`: smallest hash at or after `hash(key)`,
    /// wrapping to the first member.
    pub fn coordinator_for(&self, key: &str) -> &NodeId {
        &self.member_at(self.coordinator_index(key)).id
    }

    fn coordinator_index(&self, key: &str) -> usize {
        let key_hash = hash_hex(key);
        self.members
            .partition_point(|member| member.hash.as_str() < key_hash.as_str())
            % self.members.len()
    }

    /// Next two members clockwise from `id`.
    ///
    /// Rings smaller than three members wrap onto themselves, so entries may
    /// repeat; use [`HashRing::replicas_for`] for a de-duplicated target list.
    pub fn successors_of(&self, id: &str) -> Result<[&NodeId; 2]> {
        let index = self.index_of(id)?;
        Ok([
            &self.member_at(index + 1).id,
            &self.member_at(index + 2).id,
        ])
    }

    /// Previous two members counter-clockwise from `id`, nearest first.
    pub fn predecessors_of(&self, id: &str) -> Result<[&NodeId; 2]> {
        let index = self.index_of(id)?;
        let len = self.members.len();
        Ok([
            &self.member_at(index + len - 1).id,
            &self.member_at(index + 2 * len - 2).id,
        ])
    }

    /// Coordinator for `key` followed by its successors, without repeats.
    pub fn replicas_for(&self, key: &str) -> Vec<&NodeId> {
        let start = self.coordinator_index(key);
        (0..REPLICATION_FACTOR.min(self.members.len()))
            .map(|offset| &self.member_at(start + offset).id)
            .collect()
    }

    /// Whether `id` should hold `key`: it coordinates the key, or the key's
    /// coordinator is one of its two predecessors.
    pub fn owns_replica(&self, id: &str, key: &str) -> Result<bool> {
        let coordinator = self.coordinator_for(key);
        if coordinator == id {
            return Ok(true);
        }
        let predecessors = self.predecessors_of(id)?;
        Ok(predecessors.contains(&coordinator))
    }

    pub(crate) fn set_alive(&self, id: &str, alive: bool) {
        if let Some(member) = self.members.iter().find(|member| member.id == id) {
            let was = member.alive.swap(alive, Ordering::Relaxed);
            if was != alive {
                tracing::debug!(peer = %id, alive, "member liveness changed");
            }
        }
    }
}
