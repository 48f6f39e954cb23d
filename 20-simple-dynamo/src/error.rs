//! Errors surfaced by ring lookups, the wire codec and node operations.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::ring::NodeId;

/// Library error for every fallible node operation.
///
/// Ring and configuration variants are fatal at startup. `Timeout` and
/// `ShuttingDown` are the only errors a caller sees from a healthy node: reads,
/// dumps and recovery wait for peers with a deadline instead of spinning forever.
#[derive(Debug, Error)]
pub enum DynamoError {
    #[error("ring has no members")]
    EmptyRing,

    #[error("node {0} appears more than once in the ring")]
    DuplicateMember(NodeId),

    #[error("node {0} is not a ring member")]
    UnknownMember(NodeId),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{operation} timed out after {waited:?}")]
    Timeout {
        operation: &'static str,
        waited: Duration,
    },

    #[error("node is shutting down")]
    ShuttingDown,

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DynamoError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DynamoError::Timeout { .. })
    }
}

pub type Result<T, E = DynamoError> = std::result::Result<T, E>;
