use crate::error::FleetError;
use crate::executor::types::TaskKind;
use crate::metrics::RingBuffer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Stopped,
    Running,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Stopped => f.write_str("stopped"),
            ExecutionStatus::Running => f.write_str("running"),
        }
    }
}

/// Units completed during one monitor interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThroughputSample {
    pub count: u64,
    pub timestamp_ms: u64,
}

impl fmt::Display for ThroughputSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.count, self.timestamp_ms)
    }
}

/// Parses `<count> <timestamp_ms>`.
impl FromStr for ThroughputSample {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (Some(count), Some(timestamp), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(FleetError::malformed(format!(
                "throughput sample '{}' is not '<count> <timestamp_ms>'",
                s
            )));
        };

        let count = count
            .parse::<u64>()
            .map_err(|e| FleetError::malformed(format!("throughput count '{}': {}", count, e)))?;
        let timestamp_ms = timestamp.parse::<u64>().map_err(|e| {
            FleetError::malformed(format!("throughput timestamp '{}': {}", timestamp, e))
        })?;

        Ok(Self {
            count,
            timestamp_ms,
        })
    }
}

/// Operational state of one node, owned by that node and cached by peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOps {
    pub status: ExecutionStatus,
    pub active: BTreeMap<TaskKind, bool>,
    pub logs: RingBuffer<String>,
    pub throughput: RingBuffer<ThroughputSample>,
}

impl NodeOps {
    /// State of our own node at startup: stopped, every kind active.
    pub fn local() -> Self {
        Self::with_active(true)
    }

    /// Placeholder for a peer until its first snapshot arrives: stopped,
    /// nothing active.
    pub fn peer() -> Self {
        Self::with_active(false)
    }

    fn with_active(active: bool) -> Self {
        Self {
            status: ExecutionStatus::Stopped,
            active: TaskKind::ALL.into_iter().map(|kind| (kind, active)).collect(),
            logs: RingBuffer::new(),
            throughput: RingBuffer::new(),
        }
    }

    pub fn is_active(&self, kind: TaskKind) -> bool {
        self.active.get(&kind).copied().unwrap_or(false)
    }
}

/// Per-kind entry of a node view.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub tag: char,
    pub name: &'static str,
    pub active: bool,
}

/// One node as shown to operators.
#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub name: String,
    pub state: ExecutionStatus,
    pub logs: Vec<String>,
    pub throughput_history: Vec<ThroughputSample>,
    pub target_rate: u64,
    pub workers: usize,
    pub tasks: Vec<TaskView>,
}

/// Whole-fleet view served by `GET /state`.
#[derive(Debug, Clone, Serialize)]
pub struct FleetView {
    pub target_rate: u64,
    pub target_workers: usize,
    pub nodes: Vec<NodeView>,
    /// `(timestamp_ms, count summed over nodes)`, ascending by timestamp.
    pub throughput: Vec<(u64, u64)>,
}
