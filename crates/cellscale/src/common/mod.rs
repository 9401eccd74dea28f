pub mod cli;
pub mod config;
pub mod error;
pub mod placeholders;
pub mod setup;
pub mod utils;
pub mod wrapped;
