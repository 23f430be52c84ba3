//! Fleet node context
//!
//! [`FleetNode`] is built once at startup and handed to every component:
//! control loop, telemetry duties and HTTP handlers all reach the membership
//! service, bus, pool and shared state through it.

use crate::api::hub::{UiEvent, UiHub};
use crate::bus::{Inbox, InboxReceivers, MessageBus};
use crate::error::Result;
use crate::executor::pool::WorkerPool;
use crate::executor::sink::{SinkConnector, SinkHandle};
use crate::executor::source::RecordSource;
use crate::executor::types::{PoolTargets, now_ms};
use crate::membership::Delegate;
use crate::membership::service::MembershipService;
use crate::membership::types::{GossipConfig, Node, NodeId};
use crate::state::{FleetState, FleetView};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything needed to bring one node up.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub gossip: GossipConfig,
    pub workers: usize,
    pub rate: u64,
    pub sink: String,
    /// How long TERMINATE waits before leaving.
    pub terminate_grace: Duration,
}

impl NodeSettings {
    /// Loopback node with fast gossip timings.
    pub fn local(name: &str) -> Self {
        Self {
            gossip: GossipConfig::local(name),
            workers: 1,
            rate: 1000,
            sink: "local".to_string(),
            terminate_grace: Duration::from_millis(500),
        }
    }
}

pub struct FleetNode {
    pub membership: Arc<MembershipService>,
    pub state: Arc<FleetState>,
    pub targets: Arc<PoolTargets>,
    pub bus: Arc<MessageBus>,
    pub pool: Arc<WorkerPool>,
    pub sink: Arc<SinkHandle>,
    pub hub: Arc<UiHub>,
    pub terminate_grace: Duration,
    /// Unix milliseconds at startup.
    pub started_ms: u64,
    started: Instant,
}

impl FleetNode {
    /// Binds the transport, starts gossip and wires up the pipeline.
    ///
    /// Returns the node together with the consumer ends of its bus queues.
    pub async fn launch(
        settings: NodeSettings,
        connector: Arc<dyn SinkConnector>,
        source: Arc<dyn RecordSource>,
    ) -> Result<(Arc<Self>, InboxReceivers)> {
        let name = settings.gossip.name.clone();
        let state = Arc::new(FleetState::new(name.clone()));
        let targets = Arc::new(PoolTargets::new(settings.workers, settings.rate));
        let hub = Arc::new(UiHub::default());
        let (inbox, receivers) = Inbox::new();

        let delegate = Arc::new(ClusterDelegate {
            state: state.clone(),
            inbox: inbox.clone(),
            hub: hub.clone(),
            targets: targets.clone(),
        });

        let membership = MembershipService::new(settings.gossip, delegate).await?;
        membership.clone().start().await;

        let bus = Arc::new(MessageBus::new(membership.clone(), inbox));
        let sink = Arc::new(SinkHandle::new(connector, settings.sink));
        let pool = WorkerPool::new(
            state.clone(),
            bus.clone(),
            sink.clone(),
            source,
            targets.clone(),
        );

        tracing::info!(
            "Node {} up: {} worker(s), {} units/s, sink {}",
            name,
            targets.workers(),
            targets.rate(),
            sink.selector()
        );

        let node = Arc::new(Self {
            membership,
            state,
            targets,
            bus,
            pool,
            sink,
            hub,
            terminate_grace: settings.terminate_grace,
            started_ms: now_ms(),
            started: Instant::now(),
        });

        Ok((node, receivers))
    }

    pub fn name(&self) -> &NodeId {
        self.membership.name()
    }

    /// Joins through `seeds`. An empty list starts a fleet of one.
    pub async fn join(&self, seeds: &[SocketAddr]) -> Result<usize> {
        if seeds.is_empty() {
            tracing::info!("No seeds, starting as founder");
            return Ok(0);
        }
        let joined = self.membership.join(seeds).await?;
        tracing::info!("Joined through {} of {} seed(s)", joined, seeds.len());
        Ok(joined)
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Operator view of every live member.
    pub fn view(&self) -> FleetView {
        self.state.view(&self.membership.members(), &self.targets)
    }
}

/// Plugs shared state, the bus inbox and the UI hub into membership events.
struct ClusterDelegate {
    state: Arc<FleetState>,
    inbox: Arc<Inbox>,
    hub: Arc<UiHub>,
    targets: Arc<PoolTargets>,
}

impl Delegate for ClusterDelegate {
    fn local_state(&self) -> Vec<u8> {
        self.state.snapshot()
    }

    fn merge_remote_state(&self, snapshot: &[u8], live: &[NodeId]) {
        let merged = self.state.merge(snapshot, live);
        tracing::debug!("Merged state for {} peer(s)", merged);
    }

    fn notify_msg(&self, payload: &[u8]) {
        if let Err(e) = self.inbox.deliver(payload) {
            tracing::warn!("Dropping bus datagram: {}", e);
        }
    }

    fn notify_join(&self, node: &Node) {
        if &node.id == self.state.me() {
            return;
        }
        tracing::info!("Node {} joined", node.id);
        self.state.add_peer(&node.id);
        let view = self.state.node_view(&node.id, &self.targets);
        self.hub.publish(UiEvent::new_node(&view));
    }

    fn notify_leave(&self, node: &Node) {
        if &node.id == self.state.me() {
            return;
        }
        tracing::info!("Node {} left", node.id);
        self.state.remove_peer(&node.id);
        self.hub.publish(UiEvent::gone_node(&node.id));
    }
}
