use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Hostname, PartitionId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Up,
    Down,
    /// Excluded from scheduling by an operator.
    Frozen,
}

/// Server entry in the scheduler's directory store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub name: Hostname,
    pub partition: PartitionId,
    pub cell: String,
    pub create_timestamp: DateTime<Utc>,
}

/// A directory record joined with what the scheduler currently observes.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub record: ServerRecord,
    pub state: ServerState,
    pub workload_count: u32,
    /// Protected from garbage collection by an in-flight creation marker.
    pub pinned: bool,
}

impl ServerInfo {
    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn is_idle(&self) -> bool {
        self.state == ServerState::Up && self.workload_count == 0
    }

    /// Servers still doing useful work; `min_servers` is enforced against these.
    pub fn is_active(&self) -> bool {
        self.state != ServerState::Down || self.workload_count > 0
    }

    pub fn is_stale(&self) -> bool {
        self.state == ServerState::Down && self.workload_count == 0 && !self.pinned
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub id: String,
    pub partition: PartitionId,
    #[serde(default)]
    pub bound_server: Option<Hostname>,
}

impl Workload {
    pub fn is_pending(&self) -> bool {
        self.bound_server.is_none()
    }
}

/// Everything the planner needs to know about one partition in one cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PartitionState {
    pub servers: Vec<ServerInfo>,
    pub workloads: Vec<Workload>,
}
