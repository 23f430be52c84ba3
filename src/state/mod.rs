//! Shared Operational State
//!
//! Every node keeps a small record per known node: run status, which task
//! kinds are active, and two bounded metric histories. A node owns its own
//! record; peers hold read-only copies refreshed by the anti-entropy exchange.
//!
//! ## Merge rule
//! A remote snapshot only updates nodes that are both in the snapshot and in
//! our live membership view. Copies are overwritten wholesale, so a cached
//! record is at most one push/pull interval old. Departed nodes are purged
//! and never come back through a stale snapshot.

pub mod shared;
pub mod types;

#[cfg(test)]
mod tests;

pub use shared::FleetState;
pub use types::{ExecutionStatus, FleetView, NodeOps, NodeView, ThroughputSample};
