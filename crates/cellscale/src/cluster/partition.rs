use serde::{Deserialize, Serialize};

use crate::PartitionId;
use crate::cluster::Lifecycle;

/// Scaling bounds of a single partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PartitionConfig {
    pub min_servers: u32,
    pub max_servers: u32,
    /// How many servers are wanted per pending workload.
    pub server_app_ratio: f64,
    #[serde(default)]
    pub min_on_demand: Option<u32>,
    #[serde(default)]
    pub max_on_demand: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Partition {
    pub id: PartitionId,
    pub config: PartitionConfig,
    pub subnets: Vec<String>,
    pub on_demand_instance_types: Vec<String>,
    pub spot_instance_types: Vec<String>,
    /// Overrides the cell-wide instance image.
    pub image: Option<String>,
}

impl Partition {
    pub fn instance_types(&self, lifecycle: Lifecycle) -> &[String] {
        match lifecycle {
            Lifecycle::OnDemand => &self.on_demand_instance_types,
            Lifecycle::Spot => &self.spot_instance_types,
        }
    }
}
