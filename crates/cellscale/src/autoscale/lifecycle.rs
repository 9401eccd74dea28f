use chrono::Utc;
use thiserror::Error;

use crate::autoscale::ScaleResult;
use crate::clients::{CellClients, ClientError, ComputeError, InstanceSpec, OneTimeSecret};
use crate::cluster::{HostDescriptor, Partition, Placement, ServerRecord};
use crate::common::config::CellConfig;
use crate::common::placeholders::{
    BootstrapValues, DEFAULT_BOOTSTRAP_TEMPLATE, fill_bootstrap_template,
};
use crate::{InstanceId, PartitionId};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("directory enrollment failed: {0}")]
    Enrollment(#[source] ClientError),
    #[error("instance creation failed: {0}")]
    Compute(#[source] ComputeError),
    #[error("recording the server failed: {0}")]
    Record(#[source] ClientError),
}

/// Cell-wide values needed to create hosts.
#[derive(Debug, Clone)]
pub struct CellIdentity {
    pub cell: String,
    pub domain: String,
    pub image: String,
    pub bootstrap_template: String,
}

impl CellIdentity {
    pub fn from_config(config: &CellConfig) -> Self {
        Self {
            cell: config.cell.clone(),
            domain: config.domain.clone(),
            image: config.image.clone(),
            bootstrap_template: config
                .bootstrap_template
                .clone()
                .unwrap_or_else(|| DEFAULT_BOOTSTRAP_TEMPLATE.to_string()),
        }
    }
}

/// Creates and destroys single hosts across the directory service, the compute provider and the
/// scheduler's directory store.
pub struct Orchestrator {
    clients: CellClients,
    identity: CellIdentity,
}

impl Orchestrator {
    pub fn new(clients: CellClients, identity: CellIdentity) -> Self {
        Self { clients, identity }
    }

    pub fn clients(&self) -> &CellClients {
        &self.clients
    }

    pub fn identity(&self) -> &CellIdentity {
        &self.identity
    }

    /// Creates a host: enroll, launch, record.
    ///
    /// A failing step does not undo the previous ones.
    pub async fn provision(
        &self,
        hostname: &str,
        partition: &Partition,
        placement: &Placement,
    ) -> Result<HostDescriptor, ProvisionError> {
        let secret = self
            .enroll(hostname)
            .await
            .map_err(ProvisionError::Enrollment)?;
        let instance_id = self
            .launch(hostname, partition, placement, &secret)
            .await
            .map_err(ProvisionError::Compute)?;
        self.record(hostname, &partition.id)
            .await
            .map_err(ProvisionError::Record)?;
        Ok(HostDescriptor {
            hostname: hostname.to_string(),
            partition: partition.id.clone(),
            instance_id,
            instance_type: placement.instance_type.clone(),
            lifecycle: placement.lifecycle,
            subnet: placement.subnet.clone(),
        })
    }

    pub async fn enroll(&self, hostname: &str) -> Result<OneTimeSecret, ClientError> {
        log::debug!("Enrolling {hostname}");
        self.clients.directory.enroll(hostname).await
    }

    /// Launches the instance backing `hostname`, with the join secret in its bootstrap data.
    pub async fn launch(
        &self,
        hostname: &str,
        partition: &Partition,
        placement: &Placement,
        secret: &OneTimeSecret,
    ) -> Result<InstanceId, ComputeError> {
        let user_data = fill_bootstrap_template(
            &self.identity.bootstrap_template,
            &BootstrapValues {
                hostname,
                cell: &self.identity.cell,
                partition: &partition.id,
                domain: &self.identity.domain,
                otp: secret.expose(),
            },
        );
        let spec = InstanceSpec {
            hostname: hostname.to_string(),
            image: partition
                .image
                .clone()
                .unwrap_or_else(|| self.identity.image.clone()),
            instance_type: placement.instance_type.clone(),
            subnet: placement.subnet.clone(),
            lifecycle: placement.lifecycle,
            user_data,
        };
        self.clients.compute.create(spec).await
    }

    pub async fn record(&self, hostname: &str, partition: &PartitionId) -> Result<(), ClientError> {
        let record = ServerRecord {
            name: hostname.to_string(),
            partition: partition.clone(),
            cell: self.identity.cell.clone(),
            create_timestamp: Utc::now(),
        };
        self.clients.admin.create(record).await
    }

    /// Best-effort removal of an enrollment for a host that never got an instance.
    pub async fn abandon(&self, hostname: &str) {
        match self.clients.directory.unenroll(hostname).await {
            Ok(()) | Err(ClientError::NotFound(_)) => {}
            Err(error) => {
                log::warn!("Could not unenroll abandoned host {hostname}: {error:?}");
            }
        }
    }

    /// Destroys a host: erase the record, terminate the instance, unenroll.
    ///
    /// Steps whose target is already gone are skipped, so repeating the call is harmless.
    pub async fn decommission(&self, hostname: &str) -> ScaleResult<()> {
        log::debug!("Decommissioning {hostname}");
        ignore_missing(hostname, self.clients.admin.delete(hostname).await)?;
        ignore_missing(hostname, self.clients.compute.terminate(hostname).await)?;
        ignore_missing(hostname, self.clients.directory.unenroll(hostname).await)?;
        Ok(())
    }
}

fn ignore_missing(hostname: &str, result: Result<(), ClientError>) -> ScaleResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(ClientError::NotFound(what)) => {
            log::debug!("{what} is already gone while decommissioning {hostname}");
            Ok(())
        }
        Err(error) => Err(anyhow::Error::from(error)
            .context(format!("Cannot decommission {hostname}"))),
    }
}

#[cfg(test)]
mod tests {
    use crate::autoscale::lifecycle::{Orchestrator, ProvisionError};
    use crate::clients::ComputeError;
    use crate::cluster::{Lifecycle, Placement};
    use crate::tests::utils::{FakeCell, TestPartitionBuilder, test_identity};

    fn placement() -> Placement {
        Placement {
            instance_type: "od.large".to_string(),
            subnet: "subnet-a".to_string(),
            lifecycle: Lifecycle::OnDemand,
        }
    }

    #[tokio::test]
    async fn provision_in_order() {
        let cell = FakeCell::default();
        let orchestrator = Orchestrator::new(cell.clients(), test_identity());
        let partition = TestPartitionBuilder::default().build();

        let host = orchestrator
            .provision("h1", &partition, &placement())
            .await
            .unwrap();
        assert_eq!(host.hostname, "h1");
        assert_eq!(host.partition, "gpu");
        assert_eq!(host.lifecycle, Lifecycle::OnDemand);

        let state = cell.state();
        assert_eq!(state.calls, vec!["enroll h1", "create h1", "record h1"]);
        assert_eq!(state.attempts[0].user_data, "host=h1 otp=otp-1");
        assert_eq!(state.attempts[0].image, "img");
        assert_eq!(state.records["h1"].cell, "c1");
    }

    #[tokio::test]
    async fn provision_does_not_clean_up() {
        let cell = FakeCell::with_compute(|_| {
            Err(ComputeError::from_code("UnauthorizedOperation", "denied"))
        });
        let orchestrator = Orchestrator::new(cell.clients(), test_identity());
        let partition = TestPartitionBuilder::default().build();

        let result = orchestrator.provision("h1", &partition, &placement()).await;
        assert!(matches!(result, Err(ProvisionError::Compute(_))));
        assert!(cell.state().enrolled.contains_key("h1"));
        assert!(cell.state().records.is_empty());
    }

    #[tokio::test]
    async fn decommission_in_reverse_order() {
        let cell = FakeCell::default();
        let orchestrator = Orchestrator::new(cell.clients(), test_identity());
        let partition = TestPartitionBuilder::default().build();
        orchestrator
            .provision("h1", &partition, &placement())
            .await
            .unwrap();
        cell.state_mut().calls.clear();

        orchestrator.decommission("h1").await.unwrap();
        let state = cell.state();
        assert_eq!(state.calls, vec!["erase h1", "terminate h1", "unenroll h1"]);
        assert!(state.records.is_empty());
        assert!(state.instances.is_empty());
        assert!(state.enrolled.is_empty());
    }

    #[tokio::test]
    async fn decommission_twice() {
        let cell = FakeCell::default();
        let orchestrator = Orchestrator::new(cell.clients(), test_identity());
        let partition = TestPartitionBuilder::default().build();
        orchestrator
            .provision("h1", &partition, &placement())
            .await
            .unwrap();

        orchestrator.decommission("h1").await.unwrap();
        orchestrator.decommission("h1").await.unwrap();
        orchestrator.decommission("never-existed").await.unwrap();
    }
}
