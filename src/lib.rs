//! Ingestion Fleet Library
//!
//! Core of a self-organizing fleet of ingestion nodes. Every node runs the
//! same binary (`main.rs`); there is no coordinator.
//!
//! ## Architecture Modules
//! - **`membership`**: SWIM-style gossip over UDP with TCP push/pull. Keeps the
//!   member list, detects failures and carries anti-entropy state snapshots.
//! - **`bus`**: Control and Telemetry broadcast channels riding on the gossip
//!   transport as user datagrams.
//! - **`control`**: The per-node state machine that applies Control commands.
//! - **`executor`**: Rate-limited, resizable worker pool that aggregates record
//!   batches and writes them to a sink.
//! - **`state`**: Operational state of every known node, merged from peers.
//! - **`telemetry`**: Throughput sampling and the Telemetry consumer.
//! - **`api`**: axum operator surface with a live WebSocket feed.
//! - **`config`**: CLI/env configuration and peer discovery.
//! - **`metrics`**, **`leader`**, **`error`**: shared building blocks.

pub mod api;
pub mod bus;
pub mod config;
pub mod control;
pub mod error;
pub mod executor;
pub mod leader;
pub mod membership;
pub mod metrics;
pub mod node;
pub mod state;
pub mod telemetry;
