//! Membership & Transport Module
//!
//! Implements a Gossip-based membership protocol (inspired by SWIM) that keeps
//! every node's view of the fleet and doubles as the datagram transport for the
//! message bus.
//!
//! ## Core Mechanisms
//! - **Probing**: Nodes periodically ping a random peer and fall back to indirect
//!   probes through other peers before suspecting it.
//! - **Failure Detection**: "Suspect" -> "Dead" transition model with timeouts.
//! - **Incarnation Numbers**: Resolve disputed rumours; a node refutes false
//!   suspicion by bumping its incarnation.
//! - **Push/Pull**: Join and periodic anti-entropy exchange the member table and
//!   an opaque operational-state snapshot over TCP.
//!
//! Application code plugs in through the [`Delegate`] trait.

pub mod pushpull;
pub mod service;
pub mod types;

#[cfg(test)]
mod tests;

use types::{Node, NodeId};

/// Hooks the membership layer calls into.
///
/// Implementations must be quick and non-blocking: they run on the gossip
/// tasks. Join/leave notifications and state merges are serialized with each
/// other.
pub trait Delegate: Send + Sync {
    /// Snapshot of local operational state, shipped on every push/pull.
    fn local_state(&self) -> Vec<u8>;

    /// Merge a peer's snapshot. `live` lists current live members except self.
    fn merge_remote_state(&self, snapshot: &[u8], live: &[NodeId]);

    /// A user datagram arrived.
    fn notify_msg(&self, payload: &[u8]);

    fn notify_join(&self, node: &Node);

    fn notify_leave(&self, node: &Node);
}

/// Delegate that ignores everything; useful for bare transport setups.
pub struct NoopDelegate;

impl Delegate for NoopDelegate {
    fn local_state(&self) -> Vec<u8> {
        Vec::new()
    }

    fn merge_remote_state(&self, _snapshot: &[u8], _live: &[NodeId]) {}

    fn notify_msg(&self, _payload: &[u8]) {}

    fn notify_join(&self, _node: &Node) {}

    fn notify_leave(&self, _node: &Node) {}
}
