use std::time::Duration;

use serde::Serialize;
use tokio::time::MissedTickBehavior;

use crate::autoscale::ScaleResult;
use crate::autoscale::config::{BATCH_FAILURE_DELAYS, get_parallelism};
use crate::autoscale::decommission::{DecommissionEngine, DecommissionReport};
use crate::autoscale::lifecycle::{CellIdentity, Orchestrator};
use crate::autoscale::limiter::{RateLimiter, RateLimiterStatus};
use crate::autoscale::placement::{PlacementEngine, PlacementRequest};
use crate::autoscale::planner::{ScalingPlan, plan};
use crate::autoscale::reader::read_partition_state;
use crate::clients::CellClients;
use crate::cluster::{HostDescriptor, Partition, PartitionState};
use crate::common::config::CellConfig;
use crate::{Map, PartitionId};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CycleMode {
    Apply,
    /// Only compute the plan.
    DryRun,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PartitionOutcome {
    pub created: Vec<HostDescriptor>,
    pub decommissioned: Option<DecommissionReport>,
    /// Creation was skipped because of recent failures.
    pub postponed: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub plan: ScalingPlan,
    pub partitions: Map<PartitionId, PartitionOutcome>,
}

/// Long-lived state of the autoscaler across planning cycles.
pub struct Autoscaler {
    orchestrator: Orchestrator,
    partitions: Vec<Partition>,
    parallelism: usize,
    transient_retries: u32,
    limiter_delays: Vec<Duration>,
    limiters: Map<PartitionId, RateLimiter>,
}

impl Autoscaler {
    pub fn new(clients: CellClients, config: &CellConfig) -> Self {
        Self::from_parts(
            Orchestrator::new(clients, CellIdentity::from_config(config)),
            config.partitions(),
            get_parallelism(config.parallelism),
            config.transient_retries,
            BATCH_FAILURE_DELAYS.to_vec(),
        )
    }

    pub fn from_parts(
        orchestrator: Orchestrator,
        partitions: Vec<Partition>,
        parallelism: usize,
        transient_retries: u32,
        limiter_delays: Vec<Duration>,
    ) -> Self {
        Self {
            orchestrator,
            partitions,
            parallelism,
            transient_retries,
            limiter_delays,
            limiters: Map::default(),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn partition(&self, id: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.id == id)
    }

    pub fn placement_engine(&self) -> PlacementEngine<'_> {
        PlacementEngine::new(&self.orchestrator, self.parallelism, self.transient_retries)
    }

    pub fn decommission_engine(&self) -> DecommissionEngine<'_> {
        DecommissionEngine::new(&self.orchestrator, self.parallelism)
    }

    /// Reads all partitions. Fails if any of them cannot be read.
    pub async fn read_states(&self) -> ScaleResult<Map<PartitionId, PartitionState>> {
        let clients = self.orchestrator.clients();
        let cell = &self.orchestrator.identity().cell;
        let states = futures::future::try_join_all(
            self.partitions
                .iter()
                .map(|partition| read_partition_state(clients, cell, &partition.id)),
        )
        .await?;
        Ok(self
            .partitions
            .iter()
            .map(|partition| partition.id.clone())
            .zip(states)
            .collect())
    }

    pub async fn plan(&self) -> ScaleResult<ScalingPlan> {
        let states = self.read_states().await?;
        Ok(self.plan_states(&states))
    }

    fn plan_states(&self, states: &Map<PartitionId, PartitionState>) -> ScalingPlan {
        plan(
            self.partitions
                .iter()
                .filter_map(|partition| states.get(&partition.id).map(|state| (partition, state))),
        )
    }

    /// Reads, plans and (unless in dry-run mode) applies one planning decision.
    pub async fn run_cycle(&mut self, mode: CycleMode) -> ScaleResult<CycleReport> {
        let plan = self.plan().await?;
        let mut report = CycleReport {
            plan: plan.clone(),
            partitions: Map::default(),
        };
        if mode == CycleMode::DryRun || plan.is_empty() {
            return Ok(report);
        }

        for partition in &self.partitions {
            let mut outcome = PartitionOutcome::default();
            if let Some(names) = plan.delete.get(&partition.id) {
                log::info!(
                    "Deleting {} host(s) in partition {}",
                    names.len(),
                    partition.id
                );
                let engine = DecommissionEngine::new(&self.orchestrator, self.parallelism);
                outcome.decommissioned = Some(engine.delete_by_name(names).await);
            }
            if let Some(&count) = plan.create.get(&partition.id) {
                let status =
                    partition_limiter(&mut self.limiters, &self.limiter_delays, &partition.id)
                        .status();
                if status == RateLimiterStatus::Wait {
                    log::info!(
                        "Postponing creation of {count} host(s) in partition {} after failed batches",
                        partition.id
                    );
                    outcome.postponed = true;
                } else {
                    let engine = PlacementEngine::new(
                        &self.orchestrator,
                        self.parallelism,
                        self.transient_retries,
                    );
                    let result = engine
                        .create_n(partition, &PlacementRequest::for_partition(partition, count))
                        .await;
                    let limiter =
                        partition_limiter(&mut self.limiters, &self.limiter_delays, &partition.id);
                    match result {
                        Ok(hosts) => {
                            limiter.on_batch_success();
                            outcome.created = hosts;
                        }
                        Err(error) => {
                            log::error!("Batch in partition {} failed: {error}", partition.id);
                            limiter.on_batch_fail();
                            outcome.error = Some(error.to_string());
                            outcome.created = error.created;
                        }
                    }
                }
            }
            report.partitions.insert(partition.id.clone(), outcome);
        }
        Ok(report)
    }
}

fn partition_limiter<'a>(
    limiters: &'a mut Map<PartitionId, RateLimiter>,
    delays: &[Duration],
    partition: &str,
) -> &'a mut RateLimiter {
    limiters
        .entry(partition.to_string())
        .or_insert_with(|| RateLimiter::new(delays.to_vec()))
}

/// Main loop of the autoscaler. Runs a planning cycle every `interval` until interrupted.
pub async fn autoscale_process(autoscaler: Autoscaler, interval: Duration, mode: CycleMode) {
    let interrupted = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            log::error!("Cannot listen for interrupts: {error}");
            std::future::pending::<()>().await;
        }
    };
    autoscale_until(autoscaler, interval, mode, interrupted).await;
}

/// Runs planning cycles until `shutdown` resolves.
///
/// `shutdown` is polled across cycles, so resolving it during a running cycle stops the loop
/// once that cycle finishes.
pub async fn autoscale_until(
    mut autoscaler: Autoscaler,
    interval: Duration,
    mode: CycleMode,
    shutdown: impl Future<Output = ()>,
) {
    let mut interval = tokio::time::interval(interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                log::info!("Stopping the autoscaler");
                break;
            }
            _ = interval.tick() => {
                match autoscaler.run_cycle(mode).await {
                    Ok(report) => {
                        if !report.plan.is_empty() {
                            log::debug!("Cycle finished: {report:?}");
                        }
                    }
                    Err(error) => log::error!("Autoscaling cycle failed: {error:?}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::time::Duration;

    use tokio::sync::oneshot;

    use crate::autoscale::lifecycle::Orchestrator;
    use crate::autoscale::process::{Autoscaler, CycleMode, autoscale_until};
    use crate::clients::ComputeError;
    use crate::cluster::ServerState;
    use crate::tests::utils::{
        FakeCell, TestPartitionBuilder, init_logging, test_identity, timestamp,
    };

    fn autoscaler(cell: &FakeCell) -> Autoscaler {
        init_logging();
        Autoscaler::from_parts(
            Orchestrator::new(cell.clients(), test_identity()),
            vec![
                TestPartitionBuilder::default()
                    .min_servers(1)
                    .max_servers(9)
                    .server_app_ratio(0.5)
                    .build(),
            ],
            2,
            1,
            vec![Duration::ZERO, Duration::from_secs(3600)],
        )
    }

    fn prepare_cell(cell: &FakeCell) {
        cell.add_record("stale", "gpu", timestamp(0));
        cell.add_record("frozen", "gpu", timestamp(0));
        cell.observe("gpu", "stale", ServerState::Down);
        cell.observe("gpu", "frozen", ServerState::Frozen);
        for _ in 0..3 {
            cell.add_workload("gpu", None);
        }
    }

    #[tokio::test]
    async fn cycle_creates_and_collects() {
        let cell = FakeCell::default();
        prepare_cell(&cell);
        let mut autoscaler = autoscaler(&cell);

        let report = autoscaler.run_cycle(CycleMode::Apply).await.unwrap();
        assert_eq!(report.plan.create.get("gpu"), Some(&2));
        assert_eq!(
            report.plan.delete.get("gpu"),
            Some(&vec!["stale".to_string()])
        );

        let outcome = &report.partitions["gpu"];
        assert_eq!(outcome.created.len(), 2);
        assert_eq!(
            outcome.decommissioned.as_ref().unwrap().deleted,
            vec!["stale"]
        );
        let state = cell.state();
        assert!(state.records.contains_key("frozen"));
        assert!(!state.records.contains_key("stale"));
        assert_eq!(state.records.len(), 3);
    }

    #[tokio::test]
    async fn dry_run_changes_nothing() {
        let cell = FakeCell::default();
        prepare_cell(&cell);
        let mut autoscaler = autoscaler(&cell);

        let report = autoscaler.run_cycle(CycleMode::DryRun).await.unwrap();
        assert_eq!(report.plan.create.get("gpu"), Some(&2));
        assert!(report.partitions.is_empty());
        let state = cell.state();
        assert_eq!(state.records.len(), 2);
        assert!(state.attempts.is_empty());
    }

    #[tokio::test]
    async fn unreachable_scheduler_fails_cycle() {
        let cell = FakeCell::default();
        prepare_cell(&cell);
        cell.state_mut().scheduler_unreachable = true;
        let mut autoscaler = autoscaler(&cell);

        assert!(autoscaler.run_cycle(CycleMode::Apply).await.is_err());
        assert_eq!(cell.state().records.len(), 2);
    }

    #[tokio::test]
    async fn failed_batch_postpones_creation() {
        let cell = FakeCell::with_compute(|_| {
            Err(ComputeError::from_code("UnauthorizedOperation", "denied"))
        });
        prepare_cell(&cell);
        let mut autoscaler = autoscaler(&cell);

        let report = autoscaler.run_cycle(CycleMode::Apply).await.unwrap();
        assert!(report.partitions["gpu"].error.is_some());
        let attempts = cell.state().attempts.len();

        let report = autoscaler.run_cycle(CycleMode::Apply).await.unwrap();
        assert!(report.partitions["gpu"].postponed);
        assert_eq!(cell.state().attempts.len(), attempts);
    }

    #[tokio::test]
    async fn shutdown_during_cycle_stops_loop() {
        let (sender, receiver) = oneshot::channel::<()>();
        let sender = RefCell::new(Some(sender));
        // Shutdown is requested while the first cycle is creating hosts
        let cell = FakeCell::with_compute(move |_| {
            if let Some(sender) = sender.borrow_mut().take() {
                let _ = sender.send(());
            }
            Ok(())
        });
        prepare_cell(&cell);
        let autoscaler = autoscaler(&cell);

        tokio::time::timeout(
            Duration::from_secs(5),
            autoscale_until(
                autoscaler,
                Duration::from_millis(1),
                CycleMode::Apply,
                async move {
                    let _ = receiver.await;
                },
            ),
        )
        .await
        .unwrap();

        // A second cycle would have created two more hosts
        assert_eq!(cell.state().attempts.len(), 2);
    }
}
