//! Write and delete fan-out.
//!
//! Both operations target the key's coordinator and its two successors. The
//! local replica (if this node is one) is updated synchronously; remote
//! replicas are told over fire-and-forget sends, so the caller never learns
//! whether they applied the change.

use tracing::{debug, info};

use crate::message::Message;
use crate::node::Node;
use crate::store::Record;

impl Node {
    /// Replicates `key = value` to every member of the key's replica set.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        let record = Record::new(key, value);
        let replicas = self.ring.replicas_for(&record.key);
        info!(node = %self.id, key = %record.key, ?replicas, "replicating insert");

        let message = Message::Insert(record.clone());
        for target in replicas {
            if *target == self.id {
                self.store.put(record.key.clone(), record.value.clone());
            } else {
                self.transport.send(target, &message);
            }
        }
    }

    /// Removes `key` from every member of its replica set.
    ///
    /// The returned row count only reflects the local delete when this node
    /// coordinates the key; otherwise it is 0 regardless of what the
    /// replicas did.
    pub fn delete(&self, key: &str) -> usize {
        let replicas = self.ring.replicas_for(key);
        let coordinator = replicas[0];
        info!(node = %self.id, key, ?replicas, "replicating delete");

        let message = Message::Delete {
            requester: self.id.clone(),
            key: key.to_string(),
        };
        let mut deleted = 0;
        for target in replicas {
            if *target == self.id {
                let rows = self.store.delete(key);
                if target == coordinator {
                    deleted = rows;
                }
            } else {
                self.transport.send(target, &message);
            }
        }
        deleted
    }

    /// Replica side of `insert`: stored unconditionally, without checking
    /// that this node is actually in the key's replica set.
    pub(crate) fn on_insert(&self, record: Record) {
        debug!(node = %self.id, key = %record.key, "applying replicated insert");
        self.store.put(record.key, record.value);
    }

    /// Replica side of `delete`, equally unconditional.
    pub(crate) fn on_delete(&self, requester: &str, key: &str) {
        let rows = self.store.delete(key);
        debug!(node = %self.id, requester, key, rows, "applying replicated delete");
    }
}
