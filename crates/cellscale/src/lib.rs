#![deny(clippy::await_holding_refcell_ref)]

pub mod autoscale;
pub mod client;
pub mod clients;
pub mod cluster;
pub mod common;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::CellScaleError;
pub type Result<T> = std::result::Result<T, Error>;

pub type Map<K, V> = hashbrown::HashMap<K, V, fxhash::FxBuildHasher>;
pub type Set<T> = hashbrown::HashSet<T, fxhash::FxBuildHasher>;

// ID types
pub type PartitionId = String;
pub type Hostname = String;
pub type InstanceId = String;

pub const CELLSCALE_VERSION: &str = env!("CARGO_PKG_VERSION");

// Reexports
pub use common::wrapped::WrappedRcRefCell;
