//! Test harness: a real five-node ring on localhost.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use simple_dynamo::boot::StartupMode;
use simple_dynamo::config::{NodeConfig, Tuning};
use simple_dynamo::{HashRing, LocalStore, MemoryStore, NodeHandle, spawn_node_with};
use tokio::net::TcpListener;
use tokio::time::{Instant, sleep};

pub const MEMBERS: [&str; 5] = ["5554", "5556", "5558", "5560", "5562"];

pub fn fast_tuning() -> Tuning {
    Tuning {
        connect_timeout: Duration::from_millis(200),
        read_timeout: Duration::from_secs(1),
        query_timeout: Duration::from_millis(800),
        gather_timeout: Duration::from_millis(800),
        recovery_timeout: Duration::from_secs(1),
        ..Tuning::default()
    }
}

pub struct TestCluster {
    peers: BTreeMap<String, SocketAddr>,
    handles: BTreeMap<String, NodeHandle>,
    pub tuning: Tuning,
}

impl TestCluster {
    /// Binds one ephemeral port per member, then starts every node.
    pub async fn spawn() -> Result<Self> {
        Self::spawn_with(fast_tuning()).await
    }

    pub async fn spawn_with(tuning: Tuning) -> Result<Self> {
        let mut listeners = Vec::new();
        let mut peers = BTreeMap::new();
        for id in MEMBERS {
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            peers.insert(id.to_string(), listener.local_addr()?);
            listeners.push((id, listener));
        }

        let mut cluster = Self {
            peers,
            handles: BTreeMap::new(),
            tuning,
        };
        for (id, listener) in listeners {
            let handle = cluster
                .start(id, listener, StartupMode::FirstBoot, Arc::new(MemoryStore::new()))
                .await?;
            cluster.handles.insert(id.to_string(), handle);
        }
        Ok(cluster)
    }

    async fn start(
        &self,
        id: &str,
        listener: TcpListener,
        startup: StartupMode,
        store: Arc<dyn LocalStore>,
    ) -> Result<NodeHandle> {
        let mut config = NodeConfig::new(id, self.peers.clone())?;
        config.startup = startup;
        config.tuning = self.tuning.clone();
        spawn_node_with(listener, config, store).await
    }

    pub fn node(&self, id: &str) -> &NodeHandle {
        &self.handles[id]
    }

    pub fn ring(&self) -> &HashRing {
        self.handles
            .values()
            .next()
            .expect("cluster has running nodes")
            .ring()
    }

    /// Ids in ring order.
    pub fn ring_order(&self) -> Vec<String> {
        self.ring().members().iter().map(|m| m.id().clone()).collect()
    }

    pub fn replicas_of(&self, key: &str) -> Vec<String> {
        self.ring().replicas_for(key).into_iter().cloned().collect()
    }

    /// Some member outside the key's replica set.
    pub fn non_replica_of(&self, key: &str) -> String {
        let replicas = self.replicas_of(key);
        MEMBERS
            .iter()
            .map(|id| id.to_string())
            .find(|id| !replicas.contains(id))
            .expect("five members, three replicas")
    }

    pub async fn stop(&mut self, id: &str) -> Result<()> {
        match self.handles.remove(id) {
            Some(handle) => handle.shutdown().await,
            None => bail!("node {id} is not running"),
        }
    }

    /// Brings `id` back on its old address as a restart, with `store` as
    /// whatever survived on disk.
    pub async fn restart(&mut self, id: &str, store: Arc<dyn LocalStore>) -> Result<&NodeHandle> {
        let listener = TcpListener::bind(self.peers[id]).await?;
        let handle = self.start(id, listener, StartupMode::Restart, store).await?;
        self.handles.insert(id.to_string(), handle);
        Ok(&self.handles[id])
    }

    pub async fn shutdown(self) -> Result<()> {
        for (_, handle) in self.handles {
            handle.shutdown().await?;
        }
        Ok(())
    }
}

/// Polls `check` until it passes or two seconds elapse.
pub async fn eventually<F>(what: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if check() {
            return Ok(());
        }
        if Instant::now() > deadline {
            bail!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(20)).await;
    }
}

/// First generated key whose coordinator is `id`.
pub fn key_coordinated_by(ring: &HashRing, id: &str, prefix: &str) -> String {
    (0..10_000)
        .map(|i| format!("{prefix}{i}"))
        .find(|key| ring.coordinator_for(key) == id)
        .expect("some key lands on every member")
}
