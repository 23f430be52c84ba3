use axum::{Json, extract::Extension};
use std::sync::Arc;

use super::protocol::ClusterStatus;
use crate::node::FleetNode;
use crate::state::FleetView;

pub async fn handle_cluster_status(
    Extension(node): Extension<Arc<FleetNode>>,
) -> Json<ClusterStatus> {
    let members: Vec<String> = node
        .membership
        .members()
        .into_iter()
        .map(|id| id.to_string())
        .collect();

    Json(ClusterStatus {
        my_hostname: node.name().to_string(),
        total_members: members.len(),
        members,
        health: node.membership.health(),
        server_start: node.started_ms,
        uptime_secs: node.uptime().as_secs(),
        leader: node.membership.am_leader(),
    })
}

pub async fn handle_state(Extension(node): Extension<Arc<FleetNode>>) -> Json<FleetView> {
    Json(node.view())
}

pub async fn handle_health() -> &'static str {
    "OK"
}
