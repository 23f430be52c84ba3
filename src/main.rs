use clap::Parser;
use fleet_ingest::api;
use fleet_ingest::config::{Discovery, NodeConfig, StaticDiscovery};
use fleet_ingest::control::{ControlOutcome, Controller};
use fleet_ingest::executor::sink::MemorySink;
use fleet_ingest::executor::source::DirectorySource;
use fleet_ingest::node::FleetNode;
use fleet_ingest::telemetry;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = NodeConfig::parse();
    let settings = config.settings();

    tracing::info!("Starting node {} on {}", settings.gossip.name, config.gossip_bind);

    // 1. Discovery:
    let seeds = StaticDiscovery::new(config.seeds.clone()).peers().await?;
    if seeds.is_empty() {
        tracing::info!("Starting as seed node (founder)");
    } else {
        tracing::info!("Seed nodes: {:?}", seeds);
    }

    // 2. Node context and gossip:
    let source = Arc::new(DirectorySource::new(config.records_dir.clone()));
    let (node, mut receivers) =
        FleetNode::launch(settings, Arc::new(MemorySink::new()), source).await?;
    node.join(&seeds).await?;

    // 3. Telemetry duties:
    telemetry::spawn(&node, receivers.telemetry);

    // 4. HTTP server:
    let http_node = node.clone();
    let http_addr = config.http_bind;
    tokio::spawn(async move {
        if let Err(e) = api::serve(http_node, http_addr).await {
            tracing::error!("HTTP server failed: {}", e);
        }
    });

    // 5. Stats reporter:
    let stats_node = node.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            let alive = stats_node.membership.get_alive_members();
            tracing::info!(
                "Cluster stats: {} alive nodes, state held for {}",
                alive.len(),
                stats_node.state.known_nodes().len()
            );
            for member in alive {
                tracing::debug!(
                    "  - {} at {} (inc={})",
                    member.id,
                    member.addr,
                    member.incarnation
                );
            }
        }
    });

    // 6. Control loop, until told to terminate:
    let outcome = Controller::new(node.clone()).run(&mut receivers.control).await;
    if outcome == ControlOutcome::Terminate {
        tracing::info!("Node {} terminated", node.name());
        std::process::exit(0);
    }

    Ok(())
}
