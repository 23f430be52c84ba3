//! Operator API
//!
//! HTTP surface of a node, served with axum:
//! - `GET /cluster-status`: membership view of this node.
//! - `GET /state`: operational state of every live member.
//! - `GET /health`: load-balancer probe.
//! - `GET /ws`: live event stream; inbound text is sent as a Control message.

pub mod handlers;
pub mod hub;
pub mod protocol;
pub mod websocket;


use axum::{Router, extract::Extension, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::node::FleetNode;

pub fn router(node: Arc<FleetNode>) -> Router {
    Router::new()
        .route("/cluster-status", get(handlers::handle_cluster_status))
        .route("/state", get(handlers::handle_state))
        .route("/health", get(handlers::handle_health))
        .route("/ws", get(websocket::handle_ws))
        .layer(Extension(node))
}

/// Binds `addr` and serves until the process exits.
pub async fn serve(node: Arc<FleetNode>, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on {}", listener.local_addr()?);
    axum::serve(listener, router(node)).await?;
    Ok(())
}
