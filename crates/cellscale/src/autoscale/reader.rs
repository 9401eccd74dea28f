use futures::TryFutureExt;

use crate::autoscale::ScaleResult;
use crate::clients::{CellClients, SchedulerSnapshot, ServerFilter};
use crate::cluster::{PartitionState, ServerInfo, ServerRecord, ServerState};
use crate::{Hostname, Map, Set};

/// Reads the current state of a partition.
///
/// Any collaborator failure fails the whole read; nothing is cached between cycles.
pub async fn read_partition_state(
    clients: &CellClients,
    cell: &str,
    partition: &str,
) -> ScaleResult<PartitionState> {
    let filter = ServerFilter {
        partition: Some(partition.to_string()),
        cell: Some(cell.to_string()),
    };
    let (records, snapshot, pinned) = futures::try_join!(
        clients.admin.list(filter).map_err(anyhow::Error::from),
        clients.scheduler.read(partition),
        clients.coordination.list_pinned(partition),
    )?;
    Ok(join_partition_state(partition, records, snapshot, &pinned))
}

/// Joins directory records with what the scheduler observes.
///
/// Records the scheduler does not know about are considered down and empty.
pub fn join_partition_state(
    partition: &str,
    records: Vec<ServerRecord>,
    snapshot: SchedulerSnapshot,
    pinned: &Set<Hostname>,
) -> PartitionState {
    let SchedulerSnapshot { servers, workloads } = snapshot;
    let workloads: Vec<_> = workloads
        .into_iter()
        .filter(|w| w.partition == partition)
        .collect();

    let mut workload_counts: Map<Hostname, u32> = Map::default();
    for server in workloads.iter().filter_map(|w| w.bound_server.as_ref()) {
        *workload_counts.entry(server.clone()).or_default() += 1;
    }

    let mut observed: Map<Hostname, ServerState> = servers
        .into_iter()
        .map(|server| (server.name, server.state))
        .collect();

    let servers = records
        .into_iter()
        .map(|record| {
            let state = observed.remove(&record.name).unwrap_or_else(|| {
                log::debug!(
                    "Server {} is not known to the scheduler, considering it down",
                    record.name
                );
                ServerState::Down
            });
            ServerInfo {
                workload_count: workload_counts.get(&record.name).copied().unwrap_or(0),
                pinned: pinned.contains(&record.name),
                state,
                record,
            }
        })
        .collect();

    for name in observed.keys() {
        log::debug!("Ignoring server {name} in partition {partition}, it has no directory record");
    }

    PartitionState { servers, workloads }
}
