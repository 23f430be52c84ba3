use super::types::{ExecutionStatus, FleetView, NodeOps, NodeView, TaskView, ThroughputSample};
use crate::executor::types::{PoolTargets, TaskKind};
use crate::membership::types::NodeId;

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Operational state of every known node, behind one coarse lock.
///
/// Our own entry is written only by the local control loop and telemetry
/// duties. Peer entries are written only by [`FleetState::merge`] and the
/// join/leave hooks.
pub struct FleetState {
    me: NodeId,
    nodes: RwLock<HashMap<NodeId, NodeOps>>,
}

impl FleetState {
    pub fn new(me: NodeId) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(me.clone(), NodeOps::local());
        Self {
            me,
            nodes: RwLock::new(nodes),
        }
    }

    pub fn me(&self) -> &NodeId {
        &self.me
    }

    pub fn status(&self) -> ExecutionStatus {
        self.with_own(|ops| ops.status)
    }

    pub fn is_running(&self) -> bool {
        self.status() == ExecutionStatus::Running
    }

    pub fn set_status(&self, status: ExecutionStatus) {
        self.with_own_mut(|ops| ops.status = status);
    }

    pub fn is_active(&self, kind: TaskKind) -> bool {
        self.with_own(|ops| ops.is_active(kind))
    }

    pub fn set_active(&self, kind: TaskKind, active: bool) {
        self.with_own_mut(|ops| {
            ops.active.insert(kind, active);
        });
    }

    pub fn record_log(&self, line: impl Into<String>) {
        let line = line.into();
        self.with_own_mut(|ops| ops.logs.append(line));
    }

    pub fn record_throughput(&self, sample: ThroughputSample) {
        self.with_own_mut(|ops| ops.throughput.append(sample));
    }

    pub fn node(&self, id: &NodeId) -> Option<NodeOps> {
        self.nodes.read().get(id).cloned()
    }

    pub fn known_nodes(&self) -> Vec<NodeId> {
        let mut names: Vec<NodeId> = self.nodes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// JSON document of every node we hold state for, ourselves included.
    pub fn snapshot(&self) -> Vec<u8> {
        let nodes = self.nodes.read();
        let ordered: BTreeMap<&NodeId, &NodeOps> = nodes.iter().collect();
        match serde_json::to_vec(&ordered) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Failed to encode state snapshot: {}", e);
                Vec::new()
            }
        }
    }

    /// Overwrites cached state for every node in both `snapshot` and `live`.
    ///
    /// Our own entry is never touched. An undecodable snapshot is dropped and
    /// the cache left as it was. Returns how many entries were replaced.
    pub fn merge(&self, snapshot: &[u8], live: &[NodeId]) -> usize {
        if snapshot.is_empty() {
            return 0;
        }
        let remote: HashMap<NodeId, NodeOps> = match serde_json::from_slice(snapshot) {
            Ok(remote) => remote,
            Err(e) => {
                tracing::debug!("Dropping undecodable state snapshot: {}", e);
                return 0;
            }
        };

        let mut nodes = self.nodes.write();
        let mut merged = 0;
        for (id, ops) in remote {
            if id == self.me || !live.contains(&id) {
                continue;
            }
            nodes.insert(id, ops);
            merged += 1;
        }
        merged
    }

    /// Creates a placeholder entry for a newly joined peer.
    pub fn add_peer(&self, id: &NodeId) {
        if id == &self.me {
            return;
        }
        self.nodes
            .write()
            .entry(id.clone())
            .or_insert_with(NodeOps::peer);
    }

    /// Forgets everything about a departed peer.
    pub fn remove_peer(&self, id: &NodeId) -> bool {
        if id == &self.me {
            return false;
        }
        self.nodes.write().remove(id).is_some()
    }

    /// Operator view of one node.
    pub fn node_view(&self, id: &NodeId, targets: &PoolTargets) -> NodeView {
        let ops = self.node(id).unwrap_or_else(NodeOps::peer);
        render_node(id, &ops, targets)
    }

    /// Operator view of `members`, sorted by name, with the summed
    /// throughput series.
    pub fn view(&self, members: &[NodeId], targets: &PoolTargets) -> FleetView {
        let nodes = self.nodes.read();

        let mut names: Vec<&NodeId> = members.iter().collect();
        names.sort();
        names.dedup();

        let mut sums: BTreeMap<u64, u64> = BTreeMap::new();
        let mut views = Vec::with_capacity(names.len());
        for id in names {
            let placeholder;
            let ops = match nodes.get(id) {
                Some(ops) => ops,
                None => {
                    placeholder = NodeOps::peer();
                    &placeholder
                }
            };
            for sample in ops.throughput.iter() {
                *sums.entry(sample.timestamp_ms).or_default() += sample.count;
            }
            views.push(render_node(id, ops, targets));
        }

        FleetView {
            target_rate: targets.rate(),
            target_workers: targets.workers(),
            nodes: views,
            throughput: sums.into_iter().collect(),
        }
    }

    fn with_own<T>(&self, f: impl FnOnce(&NodeOps) -> T) -> T {
        let nodes = self.nodes.read();
        match nodes.get(&self.me) {
            Some(ops) => f(ops),
            None => f(&NodeOps::local()),
        }
    }

    fn with_own_mut(&self, f: impl FnOnce(&mut NodeOps)) {
        let mut nodes = self.nodes.write();
        f(nodes.entry(self.me.clone()).or_insert_with(NodeOps::local));
    }
}

fn render_node(id: &NodeId, ops: &NodeOps, targets: &PoolTargets) -> NodeView {
    NodeView {
        name: id.to_string(),
        state: ops.status,
        logs: ops.logs.to_vec(),
        throughput_history: ops.throughput.to_vec(),
        target_rate: targets.rate(),
        workers: targets.workers(),
        tasks: TaskKind::ALL
            .into_iter()
            .map(|kind| TaskView {
                tag: kind.tag(),
                name: kind.collection(),
                active: ops.is_active(kind),
            })
            .collect(),
    }
}
