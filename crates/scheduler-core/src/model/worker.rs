use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker registry entry. Lives in the coordination store only
/// (`worker:<workerId>` hash) — never persisted to the authoritative
/// database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum WorkerStatus {
    Active,
    Inactive,
    Zombie,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInstance {
    pub worker_id: String,
    pub instance_id: String,
    pub display_name: String,
    pub host_name: String,
    pub ip_address: String,
    pub routing_patterns: Vec<String>,
    pub job_types: Vec<String>,
    pub max_parallel_jobs: u32,
    pub current_jobs: u32,
    pub last_heartbeat: DateTime<Utc>,
    pub status: WorkerStatus,
    pub version: String,
}

impl WorkerInstance {
    pub fn has_capacity(&self) -> bool {
        self.current_jobs < self.max_parallel_jobs
    }
}
