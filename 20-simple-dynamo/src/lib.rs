//! A simplified Dynamo-style key-value store.
//!
//! A fixed set of nodes forms a consistent-hash ring ordered by the SHA-1 of
//! each node id. A key lives on its coordinator (the first node whose hash is
//! at or past the key's hash, wrapping around) and the coordinator's two
//! successors. Any node accepts any operation and routes it:
//!
//! - writes and deletes are pushed to all three replicas, fire-and-forget;
//! - reads try the local store first, then ask the other replicas and take
//!   the first answer;
//! - a global dump gathers every node's records;
//! - a restarted node pulls every peer's records and keeps the ones it
//!   replicates before serving anything.
//!
//! Nodes talk over short-lived TCP connections, one pipe-delimited line per
//! connection (see [`message`]).
//!
//! # Modules
//!
//! - [`ring`]: hash ring, coordinator and replica placement
//! - [`message`]: wire format and line framing
//! - [`node`]: shared node state and inbound dispatch
//! - [`replication`], [`query`], [`recovery`]: the operations
//! - [`transport`]: one-shot sends and the accept loop
//! - [`runtime`]: spawning a node and the caller handle
//! - [`config`], [`boot`], [`cli`], [`console`]: startup and the shell

pub mod boot;
pub mod cli;
pub mod config;
pub mod console;
pub mod error;
mod mailbox;
pub mod message;
pub mod node;
pub mod query;
pub mod recovery;
pub mod replication;
pub mod ring;
pub mod runtime;
pub mod store;
pub mod transport;

pub use error::{DynamoError, Result};
pub use recovery::RecoveryReport;
pub use ring::{HashRing, NodeId};
pub use runtime::{NodeHandle, spawn_node, spawn_node_with};
pub use store::{LocalStore, MemoryStore, Record};
