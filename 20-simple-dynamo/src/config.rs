//! Node and cluster configuration.
//!
//! Membership is static: every node is started with the same id → address
//! map. When nothing else is supplied the classic five-node ring is used, with
//! each node's port derived from its identifier.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, ensure};
use serde::Deserialize;

use crate::boot::StartupMode;
use crate::error::DynamoError;
use crate::ring::{NodeId, REPLICATION_FACTOR};

/// Identifiers of the classic five-node ring.
pub const DEFAULT_MEMBERS: [&str; 5] = ["5554", "5556", "5558", "5560", "5562"];

/// Well-known listening address for a numeric node id: port `id * 2` on localhost.
pub fn derived_addr(id: &str) -> Result<SocketAddr> {
    let number: u16 = id
        .parse()
        .with_context(|| format!("node id {id:?} is not numeric; pass an explicit address"))?;
    let port = number
        .checked_mul(2)
        .ok_or_else(|| anyhow!("node id {id} does not map to a valid port"))?;
    Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
}

/// Directory of the classic ring with derived addresses.
pub fn default_peers() -> Result<BTreeMap<NodeId, SocketAddr>> {
    DEFAULT_MEMBERS
        .iter()
        .map(|id| derived_addr(id).map(|addr| (id.to_string(), addr)))
        .collect()
}

/// Timeouts and read policy.
#[derive(Debug, Clone)]
pub struct Tuning {
    /// Bound on opening an outbound connection.
    pub connect_timeout: Duration,
    /// Bound on reading the single line of an inbound connection.
    pub read_timeout: Duration,
    /// How long a read miss waits for replica replies.
    pub query_timeout: Duration,
    /// How long a global dump waits for peer dumps.
    pub gather_timeout: Duration,
    /// How long recovery waits for peer dumps before merging what arrived.
    pub recovery_timeout: Duration,
    /// Matching replies a remote read waits for. 1 = first responder wins.
    pub read_quorum: usize,
    /// Peers a global dump may miss and still succeed.
    pub tolerated_failures: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_secs(2),
            query_timeout: Duration::from_secs(3),
            gather_timeout: Duration::from_secs(3),
            recovery_timeout: Duration::from_secs(5),
            read_quorum: 1,
            tolerated_failures: 1,
        }
    }
}

/// Everything needed to start one ring member.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This node's id (must appear in `peers`).
    pub id: NodeId,
    /// Address to bind for inbound messages.
    pub listen_addr: SocketAddr,
    /// Every ring member, including this node.
    pub peers: BTreeMap<NodeId, SocketAddr>,
    pub startup: StartupMode,
    pub tuning: Tuning,
}

impl NodeConfig {
    pub fn new(id: impl Into<NodeId>, peers: BTreeMap<NodeId, SocketAddr>) -> Result<Self> {
        let id = id.into();
        let listen_addr = *peers
            .get(&id)
            .ok_or_else(|| anyhow!("node id {id} missing from peers map"))?;
        Ok(Self {
            id,
            listen_addr,
            peers,
            startup: StartupMode::FirstBoot,
            tuning: Tuning::default(),
        })
    }

    pub fn validate(&self) -> Result<(), DynamoError> {
        if self.peers.is_empty() {
            return Err(DynamoError::EmptyRing);
        }
        if !self.peers.contains_key(&self.id) {
            return Err(DynamoError::UnknownMember(self.id.clone()));
        }
        let replicas = REPLICATION_FACTOR.min(self.peers.len());
        if !(1..=replicas).contains(&self.tuning.read_quorum) {
            return Err(DynamoError::InvalidConfig(format!(
                "read quorum must be between 1 and {replicas}, got {}",
                self.tuning.read_quorum
            )));
        }
        Ok(())
    }
}

/// JSON cluster description loaded with `--config`.
///
/// ```json
/// {
///   "members": [{ "id": "5554", "addr": "127.0.0.1:11108" }],
///   "query_timeout_ms": 2000,
///   "read_quorum": 2
/// }
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterFile {
    #[serde(default)]
    pub members: Vec<MemberEntry>,
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub query_timeout_ms: Option<u64>,
    pub gather_timeout_ms: Option<u64>,
    pub recovery_timeout_ms: Option<u64>,
    pub read_quorum: Option<usize>,
    pub tolerated_failures: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemberEntry {
    pub id: NodeId,
    /// Defaults to the address derived from `id`.
    pub addr: Option<SocketAddr>,
}

impl ClusterFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read cluster file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid cluster file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Member directory, or `None` when the file lists no members.
    pub fn peers(&self) -> Result<Option<BTreeMap<NodeId, SocketAddr>>> {
        if self.members.is_empty() {
            return Ok(None);
        }
        let mut peers = BTreeMap::new();
        for member in &self.members {
            let addr = match member.addr {
                Some(addr) => addr,
                None => derived_addr(&member.id)?,
            };
            ensure!(
                peers.insert(member.id.clone(), addr).is_none(),
                "member {} listed twice",
                member.id
            );
        }
        Ok(Some(peers))
    }

    /// Overlays the values present in the file onto `tuning`.
    pub fn apply(&self, tuning: &mut Tuning) {
        let millis = Duration::from_millis;
        if let Some(ms) = self.connect_timeout_ms {
            tuning.connect_timeout = millis(ms);
        }
        if let Some(ms) = self.read_timeout_ms {
            tuning.read_timeout = millis(ms);
        }
        if let Some(ms) = self.query_timeout_ms {
            tuning.query_timeout = millis(ms);
        }
        if let Some(ms) = self.gather_timeout_ms {
            tuning.gather_timeout = millis(ms);
        }
        if let Some(ms) = self.recovery_timeout_ms {
            tuning.recovery_timeout = millis(ms);
        }
        if let Some(quorum) = self.read_quorum {
            tuning.read_quorum = quorum;
        }
        if let Some(failures) = self.tolerated_failures {
            tuning.tolerated_failures = failures;
        }
    }
}

/// Parses `id=addr` entries from the command line into a directory.
pub fn parse_peers(entries: &[String]) -> Result<BTreeMap<NodeId, SocketAddr>> {
    let mut peers = BTreeMap::new();
    for entry in entries {
        let Some((id, addr)) = entry.split_once('=') else {
            return Err(anyhow!("invalid peer entry '{entry}', expected id=addr"));
        };
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid peer address in '{entry}'"))?;
        ensure!(
            peers.insert(id.to_string(), addr).is_none(),
            "peer {id} listed twice"
        );
    }
    ensure!(
        !peers.is_empty(),
        "at least one --peer entry is required (include self)"
    );
    Ok(peers)
}
