use std::path::PathBuf;

use clap::Parser;

use crate::client::commands::autoscale::RunOpts;
use crate::client::commands::hosts::{CreateOpts, DeleteOpts, ProvisionOpts};

// Common CLI options
#[derive(Parser)]
pub struct CommonOpts {
    /// Path to the cell configuration file
    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        global = true,
        env = "CELLSCALE_CONFIG",
        default_value = "cellscale.toml",
        help_heading("GLOBAL OPTIONS")
    )]
    pub config: PathBuf,

    /// Enables more detailed log output
    #[arg(
        long,
        env = "CELLSCALE_DEBUG",
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub debug: bool,
}

// Root CLI options
#[derive(Parser)]
#[command(
    author,
    about,
    version(crate::CELLSCALE_VERSION),
    disable_help_subcommand(true),
    help_expected(true)
)]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser)]
pub enum SubCommand {
    /// Run the autoscaling loop
    Run(RunOpts),
    /// Print what the next planning cycle would do
    Plan,
    /// Create hosts in a partition
    Create(CreateOpts),
    /// Decommission hosts
    Delete(DeleteOpts),
    /// Create a single host at an explicit placement
    Provision(ProvisionOpts),
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use crate::common::cli::{RootOptions, SubCommand};

    #[test]
    fn verify_cli() {
        RootOptions::command().debug_assert();
    }

    #[test]
    fn parse_delete_by_partition() {
        let opts = RootOptions::try_parse_from([
            "cellscale",
            "--config",
            "cell.toml",
            "delete",
            "--partition",
            "gpu",
            "--count",
            "2",
        ])
        .unwrap();
        match opts.subcmd {
            SubCommand::Delete(opts) => {
                assert_eq!(opts.partition.as_deref(), Some("gpu"));
                assert_eq!(opts.count, Some(2));
                assert!(opts.names.is_empty());
            }
            _ => panic!("Unexpected subcommand"),
        }
    }

    #[test]
    fn reject_names_with_partition() {
        assert!(
            RootOptions::try_parse_from([
                "cellscale",
                "delete",
                "h1",
                "--partition",
                "gpu",
                "--count",
                "1",
            ])
            .is_err()
        );
    }
}
