use serde::{Deserialize, Serialize};

/// Response of `GET /cluster-status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub my_hostname: String,
    pub total_members: usize,
    pub members: Vec<String>,
    pub health: u32,
    /// Unix milliseconds.
    pub server_start: u64,
    pub uptime_secs: u64,
    pub leader: bool,
}
