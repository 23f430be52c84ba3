//! Error types for the fleet
//!
//! Typed failures shared by the transport, bus, pool and sink layers. Callers
//! match on variants (for example `ConnectionTimeout` vs. anything else) rather
//! than inspecting message text.

use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    // ========== Transport Errors ==========
    /// Socket could not be bound after all retries.
    #[error("Failed to bind {addr} after {attempts} attempts: {source}")]
    Bind {
        addr: SocketAddr,
        attempts: usize,
        #[source]
        source: std::io::Error,
    },

    /// None of the seed nodes answered the join push/pull.
    #[error("Unable to join cluster: none of {attempted} seed(s) responded")]
    JoinFailed { attempted: usize },

    /// User payload exceeds the single-datagram bound.
    #[error("Datagram of {size} bytes exceeds limit of {limit}")]
    DatagramTooLarge { size: usize, limit: usize },

    /// Gossip frame could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ========== Discovery Errors ==========
    #[error("Discovery failed: {reason}")]
    Discovery { reason: String },

    // ========== Bus Errors ==========
    /// First byte of a bus datagram is not a known class.
    #[error("Unknown message class tag {0}")]
    UnknownClass(u8),

    /// Control or telemetry text could not be parsed.
    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String },

    /// Outbound queue was already closed.
    #[error("Queue already closed")]
    AlreadyClosed,

    // ========== Sink Errors ==========
    /// Recoverable connectivity failure; warrants one reconnect.
    #[error("Sink connection timed out: {reason}")]
    ConnectionTimeout { reason: String },

    /// Any other sink failure; the unit is abandoned.
    #[error("Sink operation failed: {reason}")]
    Sink { reason: String },

    /// Record source could not enumerate batches.
    #[error("Record source failed: {reason}")]
    Source { reason: String },

    // ========== Metrics Errors ==========
    #[error("Series is empty")]
    EmptySeries,
}

impl FleetError {
    /// Returns true for failures that justify a reconnect-and-retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FleetError::ConnectionTimeout { .. })
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        FleetError::MalformedMessage {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
