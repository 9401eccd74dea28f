use futures::StreamExt;
use itertools::Itertools;
use serde::Serialize;

use crate::Hostname;
use crate::autoscale::ScaleResult;
use crate::autoscale::lifecycle::Orchestrator;
use crate::clients::ServerFilter;
use crate::cluster::ServerRecord;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DecommissionReport {
    pub deleted: Vec<Hostname>,
    /// Hosts that could not be torn down, with the reason.
    pub failed: Vec<(Hostname, String)>,
}

impl DecommissionReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct DecommissionEngine<'a> {
    orchestrator: &'a Orchestrator,
    parallelism: usize,
}

impl<'a> DecommissionEngine<'a> {
    pub fn new(orchestrator: &'a Orchestrator, parallelism: usize) -> Self {
        Self {
            orchestrator,
            parallelism: parallelism.max(1),
        }
    }

    /// Tears down the given hosts and tells the scheduler they are gone.
    ///
    /// A failing host does not stop the others.
    pub async fn delete_by_name(&self, names: &[Hostname]) -> DecommissionReport {
        let results: Vec<(Hostname, ScaleResult<()>)> = futures::stream::iter(names.iter())
            .map(|name| async move {
                let result = self.orchestrator.decommission(name).await;
                if result.is_ok() {
                    self.notify_scheduler(name).await;
                }
                (name.clone(), result)
            })
            .buffer_unordered(self.parallelism)
            .collect()
            .await;

        let mut report = DecommissionReport::default();
        for (name, result) in results {
            match result {
                Ok(()) => {
                    log::info!("Host {name} was decommissioned");
                    report.deleted.push(name);
                }
                Err(error) => {
                    log::error!("Host {name} could not be decommissioned: {error:?}");
                    report.failed.push((name, format!("{error:#}")));
                }
            }
        }
        report.deleted.sort();
        report.failed.sort();
        report
    }

    /// Deletes the `count` oldest servers of `partition`.
    pub async fn delete_n(&self, count: usize, partition: &str) -> ScaleResult<DecommissionReport> {
        let records = self
            .orchestrator
            .clients()
            .admin
            .list(ServerFilter {
                partition: Some(partition.to_string()),
                cell: Some(self.orchestrator.identity().cell.clone()),
            })
            .await?;
        let victims = select_oldest(records, count);
        if victims.len() < count {
            log::warn!(
                "Partition {partition} has only {} server(s), {count} were requested for deletion",
                victims.len()
            );
        }
        Ok(self.delete_by_name(&victims).await)
    }

    async fn notify_scheduler(&self, name: &str) {
        if let Err(error) = self.orchestrator.clients().scheduler.remove_server(name).await {
            log::warn!("Could not notify the scheduler about removal of {name}: {error:?}");
        }
    }
}

/// Oldest `create_timestamp` first, ties broken by name.
pub fn select_oldest(records: Vec<ServerRecord>, count: usize) -> Vec<Hostname> {
    records
        .into_iter()
        .sorted_by(|a, b| {
            a.create_timestamp
                .cmp(&b.create_timestamp)
                .then_with(|| a.name.cmp(&b.name))
        })
        .take(count)
        .map(|record| record.name)
        .collect()
}
