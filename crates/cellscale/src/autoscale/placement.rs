//! Creation of host batches.
//!
//! Every slot of a batch searches (lifecycle x instance type x subnet) for a combination the
//! compute provider accepts. Slots of one batch share a [`BatchContext`], which remembers subnets
//! that ran out of addresses and the last combination that worked for each lifecycle.
use std::cell::RefCell;

use chrono::Utc;
use futures::{StreamExt, future};
use thiserror::Error;

use crate::autoscale::hostname::batch_hostnames;
use crate::autoscale::lifecycle::{Orchestrator, ProvisionError};
use crate::clients::{ComputeError, OneTimeSecret};
use crate::cluster::{
    AttemptOutcome, HostDescriptor, Lifecycle, Partition, Placement, ProvisionAttempt,
};
use crate::{Hostname, InstanceId, Map, Set};

#[derive(Debug, Clone)]
pub struct PlacementRequest {
    pub count: u32,
    /// The first `min_on_demand` slots are always created as on-demand.
    pub min_on_demand: Option<u32>,
    /// Upper bound of on-demand hosts created by the batch.
    pub max_on_demand: Option<u32>,
}

impl PlacementRequest {
    pub fn for_partition(partition: &Partition, count: u32) -> Self {
        Self {
            count,
            min_on_demand: partition.config.min_on_demand,
            max_on_demand: partition.config.max_on_demand,
        }
    }
}

#[derive(Debug, Error)]
pub enum PlacementFailure {
    #[error("no capacity left in any instance type and subnet")]
    Exhausted,
    #[error("spot price is too low and the on-demand budget is used up")]
    SpotPriceTooLow,
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// A batch stopped at the first host that could not be placed.
///
/// Hosts created before the failure are kept.
#[derive(Debug, Error)]
#[error("cannot place host {hostname} (slot {index}): {cause}")]
pub struct BatchError {
    pub created: Vec<HostDescriptor>,
    pub index: usize,
    pub hostname: Hostname,
    #[source]
    pub cause: PlacementFailure,
}

/// State shared by all slots of one batch.
#[derive(Debug, Default)]
pub struct BatchContext {
    /// Subnets without free addresses. Only grows during a batch.
    excluded_subnets: Set<String>,
    /// `(instance type index, subnet index)` of the last successful launch per lifecycle.
    last_success: Map<Lifecycle, (usize, usize)>,
    on_demand_used: u32,
    aborted: bool,
}

impl BatchContext {
    pub fn is_excluded(&self, subnet: &str) -> bool {
        self.excluded_subnets.contains(subnet)
    }

    fn exclude_subnet(&mut self, subnet: &str) {
        if self.excluded_subnets.insert(subnet.to_string()) {
            log::info!("Subnet {subnet} has no free addresses, excluding it from this batch");
        }
    }

    fn search_start(&self, lifecycle: Lifecycle) -> (usize, usize) {
        self.last_success.get(&lifecycle).copied().unwrap_or((0, 0))
    }

    fn record_success(&mut self, lifecycle: Lifecycle, type_index: usize, subnet_index: usize) {
        self.last_success
            .insert(lifecycle, (type_index, subnet_index));
    }

    fn reserve_on_demand(&mut self, limit: Option<u32>) -> bool {
        match limit {
            Some(limit) if self.on_demand_used >= limit => false,
            _ => {
                self.on_demand_used += 1;
                true
            }
        }
    }

    fn release_on_demand(&mut self) {
        self.on_demand_used = self.on_demand_used.saturating_sub(1);
    }
}

enum SearchOutcome {
    Placed(Placement, InstanceId),
    Exhausted,
    SpotPriceTooLow,
    Failed(ComputeError),
}

fn attempt_outcome(result: &Result<InstanceId, ComputeError>) -> AttemptOutcome {
    match result {
        Ok(_) => AttemptOutcome::Created,
        Err(ComputeError::InsufficientInstanceCapacity(_)) => AttemptOutcome::InsufficientCapacity,
        Err(ComputeError::InsufficientFreeAddressesInSubnet(_)) => AttemptOutcome::SubnetFull,
        Err(ComputeError::SpotMaxPriceTooLow(_)) => AttemptOutcome::SpotPriceTooLow,
        Err(ComputeError::Transient { .. }) => AttemptOutcome::Transient,
        Err(ComputeError::Terminal { .. }) => AttemptOutcome::Terminal,
    }
}

pub struct PlacementEngine<'a> {
    orchestrator: &'a Orchestrator,
    parallelism: usize,
    transient_retries: u32,
}

impl<'a> PlacementEngine<'a> {
    pub fn new(orchestrator: &'a Orchestrator, parallelism: usize, transient_retries: u32) -> Self {
        Self {
            orchestrator,
            parallelism: parallelism.max(1),
            transient_retries,
        }
    }

    /// Creates `request.count` hosts in `partition`.
    ///
    /// After the first slot fails, no further slots are started; slots already in flight finish
    /// and their hosts are reported in [`BatchError::created`].
    pub async fn create_n(
        &self,
        partition: &Partition,
        request: &PlacementRequest,
    ) -> Result<Vec<HostDescriptor>, BatchError> {
        let identity = self.orchestrator.identity();
        let hostnames = batch_hostnames(
            &identity.cell,
            &partition.id,
            &identity.domain,
            Utc::now(),
            request.count,
        );
        log::info!(
            "Creating {} host(s) in partition {}",
            request.count,
            partition.id
        );

        let ctx = RefCell::new(BatchContext::default());
        let ctx = &ctx;
        let mut results: Vec<_> = futures::stream::iter(hostnames.into_iter().enumerate())
            .take_while(|_| future::ready(!ctx.borrow().aborted))
            .map(|(index, hostname)| async move {
                let result = self
                    .place_slot(ctx, partition, request, index, &hostname)
                    .await;
                match &result {
                    Ok(host) => log::info!(
                        "Host {hostname} created as {} {} in {}",
                        host.lifecycle,
                        host.instance_type,
                        host.subnet
                    ),
                    Err(error) => {
                        log::error!("Host {hostname} could not be created: {error}");
                        ctx.borrow_mut().aborted = true;
                    }
                }
                (index, hostname, result)
            })
            .buffer_unordered(self.parallelism)
            .collect()
            .await;
        results.sort_by_key(|(index, _, _)| *index);

        let mut created = vec![];
        let mut failure = None;
        for (index, hostname, result) in results {
            match result {
                Ok(host) => created.push(host),
                Err(cause) if failure.is_none() => failure = Some((index, hostname, cause)),
                Err(_) => {}
            }
        }
        match failure {
            None => Ok(created),
            Some((index, hostname, cause)) => Err(BatchError {
                created,
                index,
                hostname,
                cause,
            }),
        }
    }

    async fn place_slot(
        &self,
        ctx: &RefCell<BatchContext>,
        partition: &Partition,
        request: &PlacementRequest,
        index: usize,
        hostname: &str,
    ) -> Result<HostDescriptor, PlacementFailure> {
        // `max_on_demand` caps forced slots too; a slot over the cap is placed normally
        let forced_on_demand = (index as u64) < request.min_on_demand.unwrap_or(0) as u64
            && ctx.borrow_mut().reserve_on_demand(request.max_on_demand);

        let secret = match self.orchestrator.enroll(hostname).await {
            Ok(secret) => secret,
            Err(error) => {
                if forced_on_demand {
                    ctx.borrow_mut().release_on_demand();
                }
                return Err(ProvisionError::Enrollment(error).into());
            }
        };

        let (placement, instance_id) = match self
            .launch_slot(ctx, partition, request, hostname, &secret, forced_on_demand)
            .await
        {
            Ok(launched) => launched,
            Err(failure) => {
                self.orchestrator.abandon(hostname).await;
                return Err(failure);
            }
        };

        self.orchestrator
            .record(hostname, &partition.id)
            .await
            .map_err(ProvisionError::Record)?;

        Ok(HostDescriptor {
            hostname: hostname.to_string(),
            partition: partition.id.clone(),
            instance_id,
            instance_type: placement.instance_type,
            lifecycle: placement.lifecycle,
            subnet: placement.subnet,
        })
    }

    async fn launch_slot(
        &self,
        ctx: &RefCell<BatchContext>,
        partition: &Partition,
        request: &PlacementRequest,
        hostname: &str,
        secret: &OneTimeSecret,
        forced_on_demand: bool,
    ) -> Result<(Placement, InstanceId), PlacementFailure> {
        if !forced_on_demand {
            let spot_price_too_low = match self
                .search(ctx, partition, hostname, secret, Lifecycle::Spot)
                .await
            {
                SearchOutcome::Placed(placement, id) => return Ok((placement, id)),
                SearchOutcome::Exhausted => false,
                SearchOutcome::SpotPriceTooLow => true,
                SearchOutcome::Failed(error) => {
                    return Err(ProvisionError::Compute(error).into());
                }
            };
            let reserved = ctx.borrow_mut().reserve_on_demand(request.max_on_demand);
            if !reserved {
                return Err(if spot_price_too_low {
                    PlacementFailure::SpotPriceTooLow
                } else {
                    PlacementFailure::Exhausted
                });
            }
            log::info!("No spot capacity for {hostname}, falling back to on-demand");
        }

        let outcome = self
            .search(ctx, partition, hostname, secret, Lifecycle::OnDemand)
            .await;
        match outcome {
            SearchOutcome::Placed(placement, id) => Ok((placement, id)),
            SearchOutcome::Exhausted | SearchOutcome::SpotPriceTooLow => {
                ctx.borrow_mut().release_on_demand();
                Err(PlacementFailure::Exhausted)
            }
            SearchOutcome::Failed(error) => {
                ctx.borrow_mut().release_on_demand();
                Err(ProvisionError::Compute(error).into())
            }
        }
    }

    /// Walks instance types (outer) and subnets (inner) of one lifecycle, starting at the
    /// combination that last succeeded in this batch.
    async fn search(
        &self,
        ctx: &RefCell<BatchContext>,
        partition: &Partition,
        hostname: &str,
        secret: &OneTimeSecret,
        lifecycle: Lifecycle,
    ) -> SearchOutcome {
        let (start_type, start_subnet) = ctx.borrow().search_start(lifecycle);
        let instance_types = partition.instance_types(lifecycle);

        for (type_index, instance_type) in instance_types.iter().enumerate().skip(start_type) {
            let first_subnet = if type_index == start_type {
                start_subnet
            } else {
                0
            };
            for (subnet_index, subnet) in partition.subnets.iter().enumerate().skip(first_subnet) {
                if ctx.borrow().is_excluded(subnet) {
                    continue;
                }
                let placement = Placement {
                    instance_type: instance_type.clone(),
                    subnet: subnet.clone(),
                    lifecycle,
                };
                match self
                    .attempt(partition, hostname, &placement, secret)
                    .await
                {
                    Ok(id) => {
                        ctx.borrow_mut()
                            .record_success(lifecycle, type_index, subnet_index);
                        return SearchOutcome::Placed(placement, id);
                    }
                    Err(ComputeError::InsufficientInstanceCapacity(_)) => {}
                    Err(ComputeError::InsufficientFreeAddressesInSubnet(_)) => {
                        ctx.borrow_mut().exclude_subnet(subnet);
                    }
                    Err(ComputeError::SpotMaxPriceTooLow(_)) if lifecycle == Lifecycle::Spot => {
                        return SearchOutcome::SpotPriceTooLow;
                    }
                    Err(ComputeError::Transient { .. }) => {
                        log::debug!("Giving up on {placement} for {hostname} after retries");
                    }
                    Err(error) => return SearchOutcome::Failed(error),
                }
            }
        }
        log::debug!("All {lifecycle} placements are exhausted for {hostname}");
        SearchOutcome::Exhausted
    }

    /// One placement, retrying transient provider errors.
    async fn attempt(
        &self,
        partition: &Partition,
        hostname: &str,
        placement: &Placement,
        secret: &OneTimeSecret,
    ) -> Result<InstanceId, ComputeError> {
        let mut retries = 0;
        loop {
            let result = self
                .orchestrator
                .launch(hostname, partition, placement, secret)
                .await;
            log::debug!(
                "{}",
                ProvisionAttempt {
                    hostname,
                    placement,
                    outcome: attempt_outcome(&result),
                }
            );
            match result {
                Err(ComputeError::Transient { .. }) if retries < self.transient_retries => {
                    retries += 1;
                }
                result => return result,
            }
        }
    }
}
