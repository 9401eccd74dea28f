use std::path::{Path, PathBuf};
use std::time::Duration;

use itertools::Itertools;
use serde::Deserialize;

use crate::cluster::{Partition, PartitionConfig};
use crate::common::error::config_error;
use crate::common::utils::time::deserialize_duration;
use crate::{Map, PartitionId};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_PARALLELISM: usize = 4;
const DEFAULT_TRANSIENT_RETRIES: u32 = 1;

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

fn default_transient_retries() -> u32 {
    DEFAULT_TRANSIENT_RETRIES
}

/// Configuration of one cell, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CellConfig {
    pub cell: String,
    pub domain: String,
    pub image: String,
    #[serde(default)]
    pub bootstrap_template: Option<String>,
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_interval: Duration,
    /// Number of hosts created or deleted concurrently within a batch.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// How many times a transient provider error is retried at the same placement.
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,
    #[serde(default)]
    pub partitions: Map<PartitionId, PartitionSection>,
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PartitionSection {
    #[serde(flatten)]
    pub config: PartitionConfig,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub on_demand_instance_types: Vec<String>,
    #[serde(default)]
    pub spot_instance_types: Vec<String>,
    #[serde(default)]
    pub image: Option<String>,
}

/// Commands implementing the collaborator operations, as argument vectors.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BackendConfig {
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    #[serde(default)]
    pub scheduler_read: Vec<String>,
    #[serde(default)]
    pub scheduler_remove_server: Vec<String>,
    #[serde(default)]
    pub list_pinned: Vec<String>,
    #[serde(default)]
    pub enroll: Vec<String>,
    #[serde(default)]
    pub unenroll: Vec<String>,
    #[serde(default)]
    pub compute_create: Vec<String>,
    #[serde(default)]
    pub compute_terminate: Vec<String>,
    #[serde(default)]
    pub record_create: Vec<String>,
    #[serde(default)]
    pub record_delete: Vec<String>,
    #[serde(default)]
    pub record_list: Vec<String>,
}

impl CellConfig {
    pub fn parse(content: &str) -> crate::Result<Self> {
        let config: CellConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Partitions sorted by their identifier.
    pub fn partitions(&self) -> Vec<Partition> {
        self.partitions
            .iter()
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(id, section)| Partition {
                id: id.clone(),
                config: section.config.clone(),
                subnets: section.subnets.clone(),
                on_demand_instance_types: section.on_demand_instance_types.clone(),
                spot_instance_types: section.spot_instance_types.clone(),
                image: section.image.clone(),
            })
            .collect()
    }

    pub fn partition(&self, id: &str) -> crate::Result<Partition> {
        match self.partitions().into_iter().find(|p| p.id == id) {
            Some(partition) => Ok(partition),
            None => config_error(format!("Partition `{id}` is not configured")),
        }
    }

    fn validate(&self) -> crate::Result<()> {
        for (key, value) in [
            ("cell", &self.cell),
            ("domain", &self.domain),
            ("image", &self.image),
        ] {
            if value.trim().is_empty() {
                return config_error(format!("`{key}` must not be empty"));
            }
        }
        if self.parallelism == 0 {
            return config_error("`parallelism` must be at least 1".to_string());
        }
        for (id, section) in &self.partitions {
            let config = &section.config;
            if !config.server_app_ratio.is_finite() || config.server_app_ratio <= 0.0 {
                return config_error(format!(
                    "Partition `{id}`: `server-app-ratio` must be a positive number"
                ));
            }
            if config.min_servers > config.max_servers {
                return config_error(format!(
                    "Partition `{id}`: `min-servers` ({}) is larger than `max-servers` ({})",
                    config.min_servers, config.max_servers
                ));
            }
            if let (Some(min), Some(max)) = (config.min_on_demand, config.max_on_demand) {
                if min > max {
                    return config_error(format!(
                        "Partition `{id}`: `min-on-demand` ({min}) is larger than `max-on-demand` ({max})"
                    ));
                }
            }
            if section.subnets.is_empty() {
                return config_error(format!("Partition `{id}` has no subnets"));
            }
            if section.on_demand_instance_types.is_empty() && section.spot_instance_types.is_empty()
            {
                return config_error(format!("Partition `{id}` has no instance types"));
            }
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> crate::Result<CellConfig> {
    let content = std::fs::read_to_string(path)?;
    CellConfig::parse(&content)
}
