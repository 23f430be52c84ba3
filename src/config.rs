//! Node configuration
//!
//! Command-line flags with `FLEET_*` environment fallbacks, plus the
//! discovery seam used once at startup to find peers.

use crate::error::{FleetError, Result};
use crate::membership::types::{GossipConfig, NodeId};
use crate::node::NodeSettings;

use async_trait::async_trait;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "fleet-node", version, about = "Rate-limited ingestion fleet node")]
pub struct NodeConfig {
    /// Unique node name; a random uuid when omitted.
    #[arg(long, env = "FLEET_NAME")]
    pub name: Option<String>,

    #[arg(long, env = "FLEET_GOSSIP_BIND", default_value = "0.0.0.0:52001")]
    pub gossip_bind: SocketAddr,

    /// Address peers should dial; defaults to the bound address.
    #[arg(long, env = "FLEET_GOSSIP_ADVERTISE")]
    pub gossip_advertise: Option<SocketAddr>,

    #[arg(long, env = "FLEET_HTTP_BIND", default_value = "0.0.0.0:8088")]
    pub http_bind: SocketAddr,

    /// `host:port` of nodes to join through. Repeat or comma-separate.
    #[arg(long = "seed", env = "FLEET_SEEDS", value_delimiter = ',')]
    pub seeds: Vec<String>,

    #[arg(long, env = "FLEET_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Target sink units per second.
    #[arg(long, env = "FLEET_RATE", default_value_t = 1000)]
    pub rate: u64,

    #[arg(long, env = "FLEET_SINK", default_value = "local")]
    pub sink: String,

    /// Directory holding `<collection>_static_*` record files.
    #[arg(long, env = "FLEET_RECORDS_DIR", default_value = "records")]
    pub records_dir: PathBuf,

    #[arg(long, env = "FLEET_PUSH_PULL_INTERVAL_MS", default_value_t = 5000)]
    pub push_pull_interval_ms: u64,

    #[arg(long, env = "FLEET_PROBE_INTERVAL_MS", default_value_t = 1000)]
    pub probe_interval_ms: u64,

    #[arg(long, env = "FLEET_TERMINATE_GRACE_MS", default_value_t = 500)]
    pub terminate_grace_ms: u64,
}

impl NodeConfig {
    pub fn node_name(&self) -> NodeId {
        match &self.name {
            Some(name) => NodeId::from(name.as_str()),
            None => NodeId::new(),
        }
    }

    pub fn gossip(&self) -> GossipConfig {
        let probe_interval = Duration::from_millis(self.probe_interval_ms);
        GossipConfig {
            advertise_addr: self.gossip_advertise,
            probe_interval,
            probe_timeout: probe_interval / 2,
            push_pull_interval: Duration::from_millis(self.push_pull_interval_ms),
            ..GossipConfig::new(self.node_name(), self.gossip_bind)
        }
    }

    pub fn settings(&self) -> NodeSettings {
        NodeSettings {
            gossip: self.gossip(),
            workers: self.workers,
            rate: self.rate,
            sink: self.sink.clone(),
            terminate_grace: Duration::from_millis(self.terminate_grace_ms),
        }
    }
}

/// Finds candidate peers to join through.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn peers(&self) -> Result<Vec<SocketAddr>>;
}

/// Resolves a fixed list of `host:port` seeds.
pub struct StaticDiscovery {
    seeds: Vec<String>,
}

impl StaticDiscovery {
    pub fn new(seeds: Vec<String>) -> Self {
        Self { seeds }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn peers(&self) -> Result<Vec<SocketAddr>> {
        let mut peers = Vec::new();
        for seed in self.seeds.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            let resolved = tokio::net::lookup_host(seed)
                .await
                .map_err(|e| FleetError::Discovery {
                    reason: format!("resolving '{}': {}", seed, e),
                })?;
            let before = peers.len();
            peers.extend(resolved);
            if peers.len() == before {
                return Err(FleetError::Discovery {
                    reason: format!("'{}' resolved to no addresses", seed),
                });
            }
        }
        peers.dedup();
        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_env_free_parse() {
        let config = NodeConfig::parse_from(["fleet-node", "--name", "c1", "--seed", "a:1,b:2"]);

        assert_eq!(config.node_name(), NodeId::from("c1"));
        assert_eq!(config.seeds, vec!["a:1".to_string(), "b:2".to_string()]);
        assert_eq!(config.workers, 1);
        assert_eq!(config.settings().terminate_grace, Duration::from_millis(500));
        assert_eq!(
            config.gossip().push_pull_interval,
            Duration::from_millis(5000)
        );
    }

    #[test]
    fn test_unnamed_nodes_get_distinct_names() {
        let config = NodeConfig::parse_from(["fleet-node"]);

        assert_ne!(config.node_name(), config.node_name());
    }

    #[tokio::test]
    async fn test_static_discovery_resolves_literals() {
        let discovery = StaticDiscovery::new(vec!["127.0.0.1:7000".into(), " ".into()]);

        let peers = discovery.peers().await.unwrap();

        assert_eq!(peers, vec![SocketAddr::from(([127, 0, 0, 1], 7000))]);
    }

    #[tokio::test]
    async fn test_static_discovery_fails_on_garbage() {
        let discovery = StaticDiscovery::new(vec!["not an address".into()]);

        let result = discovery.peers().await;

        assert!(matches!(result, Err(FleetError::Discovery { .. })));
    }

    #[tokio::test]
    async fn test_empty_seed_list_is_valid() {
        let discovery = StaticDiscovery::new(Vec::new());

        assert!(discovery.peers().await.unwrap().is_empty());
    }
}
