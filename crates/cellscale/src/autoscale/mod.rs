pub mod config;
pub mod decommission;
pub mod hostname;
pub mod lifecycle;
pub mod limiter;
pub mod placement;
pub mod planner;
pub mod process;
pub mod reader;

pub type ScaleResult<T> = anyhow::Result<T>;
