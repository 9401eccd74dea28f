use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{Hostname, InstanceId, PartitionId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lifecycle {
    OnDemand,
    Spot,
}

impl Display for Lifecycle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Lifecycle::OnDemand => "on-demand",
            Lifecycle::Spot => "spot",
        })
    }
}

/// Where an instance should be launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub instance_type: String,
    pub subnet: String,
    pub lifecycle: Lifecycle,
}

impl Display for Placement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} in {}",
            self.lifecycle, self.instance_type, self.subnet
        )
    }
}

/// A fully provisioned host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDescriptor {
    pub hostname: Hostname,
    pub partition: PartitionId,
    pub instance_id: InstanceId,
    pub instance_type: String,
    pub lifecycle: Lifecycle,
    pub subnet: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Created,
    InsufficientCapacity,
    SubnetFull,
    SpotPriceTooLow,
    Transient,
    Terminal,
}

/// One try of launching an instance for a hostname. Only lives for the duration of a batch.
#[derive(Debug, Clone)]
pub struct ProvisionAttempt<'a> {
    pub hostname: &'a str,
    pub placement: &'a Placement,
    pub outcome: AttemptOutcome,
}

impl Display for ProvisionAttempt<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} @ {}: {:?}",
            self.hostname, self.placement, self.outcome
        )
    }
}
