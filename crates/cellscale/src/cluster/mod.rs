mod host;
mod partition;
mod server;

pub use host::{AttemptOutcome, HostDescriptor, Lifecycle, Placement, ProvisionAttempt};
pub use partition::{Partition, PartitionConfig};
pub use server::{PartitionState, ServerInfo, ServerRecord, ServerState, Workload};
