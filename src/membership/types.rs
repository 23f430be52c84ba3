use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Unique, human-readable node name.
///
/// Names double as identities: two processes must never share one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    /// Random uuid-based name for nodes started without an explicit one.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
}

impl NodeState {
    /// Alive and Suspect nodes are members; Dead ones are gone.
    pub fn is_live(self) -> bool {
        !matches!(self, NodeState::Dead)
    }
}

/// Represents a single member in the cluster.
///
/// The `incarnation` field is a logical clock used to order rumours about the
/// node and to let it refute a false "Suspect" or "Dead" claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub state: NodeState,
    pub incarnation: u64,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

/// Datagram protocol spoken over UDP.
///
/// - `Ping/Ack`: direct liveness probe; `Ack` piggybacks the member table.
/// - `PingReq`: asks a third node to probe `target` on our behalf.
/// - `Suspect/Alive/Dead`: disseminate changes in node health.
/// - `User`: opaque application payload (message bus datagrams).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Ping {
        from: NodeId,
        seq: u64,
        incarnation: u64,
    },

    Ack {
        from: NodeId,
        seq: u64,
        incarnation: u64,
        members: Vec<Node>,
    },

    PingReq {
        from: NodeId,
        seq: u64,
        target: Node,
    },

    Suspect {
        node_id: NodeId,
        incarnation: u64,
    },

    Alive {
        node: Node,
    },

    Dead {
        node_id: NodeId,
        incarnation: u64,
    },

    User {
        from: NodeId,
        payload: Vec<u8>,
    },
}

/// Full-state exchange carried over TCP during join and anti-entropy.
///
/// `state` is the delegate's opaque snapshot of operational state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPull {
    pub from: Node,
    pub join: bool,
    pub members: Vec<Node>,
    pub state: Vec<u8>,
}

/// Timing knobs of the gossip protocol.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    pub name: NodeId,
    pub bind_addr: SocketAddr,
    /// Address peers should use to reach us; defaults to the bound address.
    pub advertise_addr: Option<SocketAddr>,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub indirect_checks: usize,
    /// Time a Suspect member has to refute before it is declared dead.
    pub dead_timeout: Duration,
    /// How long a Dead entry is remembered before it is forgotten.
    pub dead_retention: Duration,
    pub push_pull_interval: Duration,
    pub tcp_timeout: Duration,
    pub bind_attempts: usize,
}

impl GossipConfig {
    pub fn new(name: NodeId, bind_addr: SocketAddr) -> Self {
        Self {
            name,
            bind_addr,
            advertise_addr: None,
            probe_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_millis(500),
            indirect_checks: 3,
            dead_timeout: Duration::from_secs(10),
            dead_retention: Duration::from_secs(30),
            push_pull_interval: Duration::from_secs(5),
            tcp_timeout: Duration::from_secs(10),
            bind_attempts: 50,
        }
    }

    /// Aggressive timings for loopback clusters in tests.
    pub fn local(name: &str) -> Self {
        Self {
            probe_interval: Duration::from_millis(100),
            probe_timeout: Duration::from_millis(50),
            dead_timeout: Duration::from_secs(3),
            dead_retention: Duration::from_secs(9),
            push_pull_interval: Duration::from_millis(200),
            tcp_timeout: Duration::from_secs(2),
            ..Self::new(NodeId::from(name), SocketAddr::from(([127, 0, 0, 1], 0)))
        }
    }
}
