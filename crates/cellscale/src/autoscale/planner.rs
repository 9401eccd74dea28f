use serde::Serialize;

use crate::cluster::{Partition, PartitionConfig, PartitionState, ServerInfo};
use crate::{Hostname, Map, PartitionId};

/// Decision for a single partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartitionDecision {
    pub create: u32,
    pub delete: Vec<Hostname>,
}

impl PartitionDecision {
    pub fn is_noop(&self) -> bool {
        self.create == 0 && self.delete.is_empty()
    }
}

/// Decisions of one planning cycle. Partitions without any action are omitted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScalingPlan {
    pub create: Map<PartitionId, u32>,
    pub delete: Map<PartitionId, Vec<Hostname>>,
}

impl ScalingPlan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.delete.is_empty()
    }
}

pub fn plan<'a>(
    partitions: impl IntoIterator<Item = (&'a Partition, &'a PartitionState)>,
) -> ScalingPlan {
    let mut plan = ScalingPlan::default();
    for (partition, state) in partitions {
        let decision = plan_partition(&partition.config, state);
        if !decision.is_noop() {
            log::debug!("Partition {}: {decision:?}", partition.id);
        }
        if decision.create > 0 {
            plan.create.insert(partition.id.clone(), decision.create);
        }
        if !decision.delete.is_empty() {
            plan.delete.insert(partition.id.clone(), decision.delete);
        }
    }
    plan
}

pub fn plan_partition(config: &PartitionConfig, state: &PartitionState) -> PartitionDecision {
    let servers = &state.servers;
    let idle = servers.iter().filter(|s| s.is_idle()).count() as u32;
    let active = servers.iter().filter(|s| s.is_active()).count() as u32;
    let pending = state.workloads.iter().filter(|w| w.is_pending()).count();

    let wanted = (pending as f64 * config.server_app_ratio).ceil();
    let wanted = if wanted >= u32::MAX as f64 {
        u32::MAX
    } else {
        wanted as u32
    };
    let deficit = wanted.saturating_sub(idle);
    let need_for_min = config.min_servers.saturating_sub(active);
    let create = config
        .max_servers
        .saturating_sub(active)
        .min(deficit.max(need_for_min));

    let mut delete = vec![];
    if deficit == 0 && need_for_min == 0 {
        // Idle servers are always active, so `active - idle` are the busy ones
        let busy = active - idle;
        let keep_idle = config.min_servers.saturating_sub(busy);
        let excess = idle.saturating_sub(keep_idle) as usize;
        if excess > 0 {
            let mut candidates: Vec<&ServerInfo> = servers.iter().filter(|s| s.is_idle()).collect();
            candidates.sort_by(|a, b| {
                a.record
                    .create_timestamp
                    .cmp(&b.record.create_timestamp)
                    .then_with(|| a.record.name.cmp(&b.record.name))
            });
            delete.extend(
                candidates
                    .into_iter()
                    .take(excess)
                    .map(|s| s.record.name.clone()),
            );
        }
    }

    let mut stale: Vec<Hostname> = servers
        .iter()
        .filter(|s| s.is_stale())
        .map(|s| s.record.name.clone())
        .collect();
    stale.sort();
    delete.extend(stale);

    PartitionDecision { create, delete }
}
