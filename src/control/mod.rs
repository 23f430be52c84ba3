//! Control State Machine
//!
//! One control loop per node consumes the Control queue in arrival order and
//! drives the node between Stopped and Running. Commands are idempotent, so a
//! duplicated broadcast is harmless.

pub mod controller;

#[cfg(test)]
mod tests;

pub use controller::{ControlOutcome, Controller, REAP_INTERVAL};
