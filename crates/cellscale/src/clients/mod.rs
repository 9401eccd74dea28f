//! Interfaces of the external systems the autoscaler talks to.
//!
//! Every operation returns an owned future, so that implementations are free to clone whatever
//! they need and callers can drive several operations at once on a single thread.
pub mod command;

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::{Lifecycle, ServerRecord, ServerState, Workload};
use crate::{Hostname, InstanceId, PartitionId, Set};

pub type ClientFuture<T> = Pin<Box<dyn Future<Output = T>>>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0} does not exist")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure reported by the compute provider when launching an instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComputeError {
    #[error("insufficient instance capacity: {0}")]
    InsufficientInstanceCapacity(String),
    #[error("insufficient free addresses in subnet: {0}")]
    InsufficientFreeAddressesInSubnet(String),
    #[error("spot max price is too low: {0}")]
    SpotMaxPriceTooLow(String),
    #[error("transient provider error {code}: {message}")]
    Transient { code: String, message: String },
    #[error("provider error {code}: {message}")]
    Terminal { code: String, message: String },
}

const TRANSIENT_CODES: &[&str] = &[
    "InternalError",
    "InternalFailure",
    "ServiceUnavailable",
    "Unavailable",
    "RequestLimitExceeded",
    "Throttling",
];

impl ComputeError {
    /// Maps a provider error code onto the closed set of failures the placement search handles.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "InsufficientInstanceCapacity" => Self::InsufficientInstanceCapacity(message),
            "InsufficientFreeAddressesInSubnet" => Self::InsufficientFreeAddressesInSubnet(message),
            "SpotMaxPriceTooLow" => Self::SpotMaxPriceTooLow(message),
            code if TRANSIENT_CODES.contains(&code) => Self::Transient {
                code: code.to_string(),
                message,
            },
            code => Self::Terminal {
                code: code.to_string(),
                message,
            },
        }
    }
}

/// Join secret issued by the directory service. Only ever embedded into bootstrap data.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OneTimeSecret(String);

impl OneTimeSecret {
    pub fn new(secret: String) -> Self {
        Self(secret)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for OneTimeSecret {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("OneTimeSecret(***)")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub hostname: Hostname,
    pub image: String,
    pub instance_type: String,
    pub subnet: String,
    pub lifecycle: Lifecycle,
    pub user_data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedServer {
    pub name: Hostname,
    pub state: ServerState,
}

/// What the scheduler reports about one partition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub servers: Vec<ObservedServer>,
    pub workloads: Vec<Workload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerFilter {
    pub partition: Option<PartitionId>,
    pub cell: Option<String>,
}

impl ServerFilter {
    pub fn matches(&self, record: &ServerRecord) -> bool {
        self.partition
            .as_ref()
            .is_none_or(|partition| partition == &record.partition)
            && self.cell.as_ref().is_none_or(|cell| cell == &record.cell)
    }
}

pub trait SchedulerState {
    fn read(&self, partition: &str) -> ClientFuture<anyhow::Result<SchedulerSnapshot>>;

    /// Tells the scheduler that a server is gone.
    fn remove_server(&self, hostname: &str) -> ClientFuture<anyhow::Result<()>>;
}

pub trait CoordinationStore {
    /// Names of servers with an in-flight creation marker.
    fn list_pinned(&self, partition: &str) -> ClientFuture<anyhow::Result<Set<Hostname>>>;
}

pub trait DirectoryService {
    /// Fails with [`ClientError::AlreadyExists`] if the host is already enrolled.
    fn enroll(&self, hostname: &str) -> ClientFuture<Result<OneTimeSecret, ClientError>>;
    fn unenroll(&self, hostname: &str) -> ClientFuture<Result<(), ClientError>>;
}

pub trait ComputeProvider {
    fn create(&self, spec: InstanceSpec) -> ClientFuture<Result<InstanceId, ComputeError>>;
    fn terminate(&self, hostname: &str) -> ClientFuture<Result<(), ClientError>>;
}

pub trait AdminStore {
    fn create(&self, record: ServerRecord) -> ClientFuture<Result<(), ClientError>>;
    fn delete(&self, name: &str) -> ClientFuture<Result<(), ClientError>>;
    fn list(&self, filter: ServerFilter) -> ClientFuture<Result<Vec<ServerRecord>, ClientError>>;
}

/// Client objects for all collaborators, constructed once and passed to the engines.
#[derive(Clone)]
pub struct CellClients {
    pub scheduler: Rc<dyn SchedulerState>,
    pub coordination: Rc<dyn CoordinationStore>,
    pub directory: Rc<dyn DirectoryService>,
    pub compute: Rc<dyn ComputeProvider>,
    pub admin: Rc<dyn AdminStore>,
}

impl CellClients {
    /// Uses one object for every collaborator.
    pub fn from_single<
        T: SchedulerState + CoordinationStore + DirectoryService + ComputeProvider + AdminStore + 'static,
    >(
        client: T,
    ) -> Self {
        let client = Rc::new(client);
        Self {
            scheduler: client.clone(),
            coordination: client.clone(),
            directory: client.clone(),
            compute: client.clone(),
            admin: client,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::clients::ComputeError;

    #[test]
    fn classify_provider_codes() {
        assert!(matches!(
            ComputeError::from_code("InsufficientInstanceCapacity", ""),
            ComputeError::InsufficientInstanceCapacity(_)
        ));
        assert!(matches!(
            ComputeError::from_code("InsufficientFreeAddressesInSubnet", ""),
            ComputeError::InsufficientFreeAddressesInSubnet(_)
        ));
        assert!(matches!(
            ComputeError::from_code("SpotMaxPriceTooLow", ""),
            ComputeError::SpotMaxPriceTooLow(_)
        ));
        assert!(matches!(
            ComputeError::from_code("InternalError", "oops"),
            ComputeError::Transient { .. }
        ));
        assert_eq!(
            ComputeError::from_code("UnauthorizedOperation", "denied"),
            ComputeError::Terminal {
                code: "UnauthorizedOperation".to_string(),
                message: "denied".to_string()
            }
        );
    }
}
