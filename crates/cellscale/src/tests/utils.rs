use chrono::{DateTime, TimeZone, Utc};
use derive_builder::Builder;
use futures::future::ready;
use log::LevelFilter;

use crate::autoscale::lifecycle::CellIdentity;
use crate::clients::{
    AdminStore, CellClients, ClientError, ClientFuture, ComputeError, ComputeProvider,
    CoordinationStore, DirectoryService, InstanceSpec, ObservedServer, OneTimeSecret,
    SchedulerSnapshot, SchedulerState, ServerFilter,
};
use crate::cluster::{Partition, PartitionConfig, ServerRecord, ServerState, Workload};
use crate::{Hostname, InstanceId, Map, PartitionId, Set, WrappedRcRefCell};

pub fn init_logging() {
    let _ = env_logger::Builder::default()
        .filter(None, LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

pub type ComputeBehaviour = Box<dyn Fn(&InstanceSpec) -> Result<(), ComputeError>>;

#[derive(Default)]
pub struct FakeCellState {
    pub snapshots: Map<PartitionId, SchedulerSnapshot>,
    pub scheduler_unreachable: bool,
    pub pinned: Set<Hostname>,
    pub enrolled: Map<Hostname, String>,
    pub instances: Map<Hostname, InstanceSpec>,
    pub records: Map<Hostname, ServerRecord>,
    /// Every launch request in the order it arrived.
    pub attempts: Vec<InstanceSpec>,
    /// Every call as `<operation> <hostname>`.
    pub calls: Vec<String>,
    pub removed_from_scheduler: Vec<Hostname>,
    pub fail_record_create: bool,
    pub fail_remove_server: bool,
    pub fail_terminate: bool,
    compute: Option<ComputeBehaviour>,
    secret_counter: u64,
    instance_counter: u64,
}

/// In-memory implementation of every collaborator of a cell.
#[derive(Clone, Default)]
pub struct FakeCell(pub WrappedRcRefCell<FakeCellState>);

impl FakeCell {
    pub fn with_compute<F: Fn(&InstanceSpec) -> Result<(), ComputeError> + 'static>(
        behaviour: F,
    ) -> Self {
        let cell = Self::default();
        cell.0.get_mut().compute = Some(Box::new(behaviour));
        cell
    }

    pub fn clients(&self) -> CellClients {
        CellClients::from_single(self.clone())
    }

    pub fn state(&self) -> std::cell::Ref<'_, FakeCellState> {
        self.0.get()
    }

    pub fn state_mut(&self) -> std::cell::RefMut<'_, FakeCellState> {
        self.0.get_mut()
    }

    pub fn add_record(&self, name: &str, partition: &str, created: DateTime<Utc>) {
        self.state_mut().records.insert(
            name.to_string(),
            ServerRecord {
                name: name.to_string(),
                partition: partition.to_string(),
                cell: "c1".to_string(),
                create_timestamp: created,
            },
        );
    }

    pub fn observe(&self, partition: &str, name: &str, state: ServerState) {
        self.state_mut()
            .snapshots
            .entry(partition.to_string())
            .or_default()
            .servers
            .push(ObservedServer {
                name: name.to_string(),
                state,
            });
    }

    pub fn add_workload(&self, partition: &str, bound_server: Option<&str>) {
        let mut state = self.state_mut();
        let snapshot = state.snapshots.entry(partition.to_string()).or_default();
        let id = format!("w{}", snapshot.workloads.len());
        snapshot.workloads.push(Workload {
            id,
            partition: partition.to_string(),
            bound_server: bound_server.map(|s| s.to_string()),
        });
    }

    /// `(instance_type, subnet, lifecycle)` of every launch attempt for `hostname`.
    pub fn attempts_of(&self, hostname: &str) -> Vec<(String, String, crate::cluster::Lifecycle)> {
        self.state()
            .attempts
            .iter()
            .filter(|spec| spec.hostname == hostname)
            .map(|spec| {
                (
                    spec.instance_type.clone(),
                    spec.subnet.clone(),
                    spec.lifecycle,
                )
            })
            .collect()
    }

    fn log_call(&self, operation: &str, hostname: &str) {
        self.state_mut()
            .calls
            .push(format!("{operation} {hostname}"));
    }
}

impl SchedulerState for FakeCell {
    fn read(&self, partition: &str) -> ClientFuture<anyhow::Result<SchedulerSnapshot>> {
        let state = self.state();
        let result = if state.scheduler_unreachable {
            Err(anyhow::anyhow!("scheduler is unreachable"))
        } else {
            Ok(state.snapshots.get(partition).cloned().unwrap_or_default())
        };
        Box::pin(ready(result))
    }

    fn remove_server(&self, hostname: &str) -> ClientFuture<anyhow::Result<()>> {
        self.log_call("remove_server", hostname);
        let mut state = self.state_mut();
        let result = if state.fail_remove_server {
            Err(anyhow::anyhow!("scheduler is unreachable"))
        } else {
            state.removed_from_scheduler.push(hostname.to_string());
            Ok(())
        };
        Box::pin(ready(result))
    }
}

impl CoordinationStore for FakeCell {
    fn list_pinned(&self, _partition: &str) -> ClientFuture<anyhow::Result<Set<Hostname>>> {
        Box::pin(ready(Ok(self.state().pinned.clone())))
    }
}

impl DirectoryService for FakeCell {
    fn enroll(&self, hostname: &str) -> ClientFuture<Result<OneTimeSecret, ClientError>> {
        self.log_call("enroll", hostname);
        let mut state = self.state_mut();
        let result = if state.enrolled.contains_key(hostname) {
            Err(ClientError::AlreadyExists(hostname.to_string()))
        } else {
            state.secret_counter += 1;
            let secret = format!("otp-{}", state.secret_counter);
            state.enrolled.insert(hostname.to_string(), secret.clone());
            Ok(OneTimeSecret::new(secret))
        };
        Box::pin(ready(result))
    }

    fn unenroll(&self, hostname: &str) -> ClientFuture<Result<(), ClientError>> {
        self.log_call("unenroll", hostname);
        let result = match self.state_mut().enrolled.remove(hostname) {
            Some(_) => Ok(()),
            None => Err(ClientError::NotFound(hostname.to_string())),
        };
        Box::pin(ready(result))
    }
}

impl ComputeProvider for FakeCell {
    fn create(&self, spec: InstanceSpec) -> ClientFuture<Result<InstanceId, ComputeError>> {
        self.log_call("create", &spec.hostname);
        let mut state = self.state_mut();
        state.attempts.push(spec.clone());
        let outcome = match &state.compute {
            Some(behaviour) => behaviour(&spec),
            None => Ok(()),
        };
        let result = outcome.map(|_| {
            state.instance_counter += 1;
            let id = format!("i-{}", state.instance_counter);
            state.instances.insert(spec.hostname.clone(), spec);
            id
        });
        Box::pin(ready(result))
    }

    fn terminate(&self, hostname: &str) -> ClientFuture<Result<(), ClientError>> {
        self.log_call("terminate", hostname);
        let mut state = self.state_mut();
        let result = if state.fail_terminate && state.instances.contains_key(hostname) {
            Err(ClientError::Other(anyhow::anyhow!("instance is protected")))
        } else {
            match state.instances.remove(hostname) {
                Some(_) => Ok(()),
                None => Err(ClientError::NotFound(hostname.to_string())),
            }
        };
        Box::pin(ready(result))
    }
}

impl AdminStore for FakeCell {
    fn create(&self, record: ServerRecord) -> ClientFuture<Result<(), ClientError>> {
        self.log_call("record", &record.name);
        let mut state = self.state_mut();
        let result = if state.fail_record_create {
            Err(ClientError::Other(anyhow::anyhow!("store is read-only")))
        } else if state.records.contains_key(&record.name) {
            Err(ClientError::AlreadyExists(record.name.clone()))
        } else {
            state.records.insert(record.name.clone(), record);
            Ok(())
        };
        Box::pin(ready(result))
    }

    fn delete(&self, name: &str) -> ClientFuture<Result<(), ClientError>> {
        self.log_call("erase", name);
        let result = match self.state_mut().records.remove(name) {
            Some(_) => Ok(()),
            None => Err(ClientError::NotFound(name.to_string())),
        };
        Box::pin(ready(result))
    }

    fn list(&self, filter: ServerFilter) -> ClientFuture<Result<Vec<ServerRecord>, ClientError>> {
        let records = self
            .state()
            .records
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        Box::pin(ready(Ok(records)))
    }
}

pub fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn string_vec(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[derive(Builder)]
#[builder(pattern = "owned", build_fn(name = "finish"))]
pub struct TestPartition {
    #[builder(default = "\"gpu\".to_string()")]
    id: String,
    #[builder(default = "0")]
    min_servers: u32,
    #[builder(default = "9")]
    max_servers: u32,
    #[builder(default = "0.5")]
    server_app_ratio: f64,
    #[builder(default)]
    min_on_demand: Option<u32>,
    #[builder(default)]
    max_on_demand: Option<u32>,
    #[builder(default = "string_vec(&[\"subnet-a\", \"subnet-b\"])")]
    subnets: Vec<String>,
    #[builder(default = "string_vec(&[\"od.large\"])")]
    on_demand_instance_types: Vec<String>,
    #[builder(default = "string_vec(&[\"spot.large\", \"spot.xlarge\"])")]
    spot_instance_types: Vec<String>,
}

impl TestPartitionBuilder {
    pub fn build(self) -> Partition {
        let TestPartition {
            id,
            min_servers,
            max_servers,
            server_app_ratio,
            min_on_demand,
            max_on_demand,
            subnets,
            on_demand_instance_types,
            spot_instance_types,
        } = self.finish().unwrap();
        Partition {
            id,
            config: PartitionConfig {
                min_servers,
                max_servers,
                server_app_ratio,
                min_on_demand,
                max_on_demand,
            },
            subnets,
            on_demand_instance_types,
            spot_instance_types,
            image: None,
        }
    }
}

pub fn test_identity() -> CellIdentity {
    CellIdentity {
        cell: "c1".to_string(),
        domain: "c1.example.com".to_string(),
        image: "img".to_string(),
        bootstrap_template: "host=%{HOSTNAME} otp=%{OTP}".to_string(),
    }
}
