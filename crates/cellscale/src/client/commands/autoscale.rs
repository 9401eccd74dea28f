use std::time::Duration;

use clap::Parser;

use crate::autoscale::config::get_poll_interval;
use crate::autoscale::process::{Autoscaler, CycleMode, autoscale_process};
use crate::client::commands::create_clients;
use crate::client::output::print_json;
use crate::common::config::CellConfig;
use crate::common::utils::time::format_duration;

#[derive(Parser)]
pub struct RunOpts {
    /// Run a single planning cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Compute plans without creating or deleting any host
    #[arg(long)]
    pub dry_run: bool,

    /// Overrides the poll interval from the configuration file
    #[arg(long, value_parser = humantime::parse_duration)]
    pub poll_interval: Option<Duration>,
}

pub async fn command_run(config: CellConfig, opts: RunOpts) -> anyhow::Result<()> {
    let mut autoscaler = Autoscaler::new(create_clients(&config)?, &config);
    let mode = if opts.dry_run {
        CycleMode::DryRun
    } else {
        CycleMode::Apply
    };

    if opts.once {
        let report = autoscaler.run_cycle(mode).await?;
        return print_json(&report);
    }

    let interval = get_poll_interval(opts.poll_interval.unwrap_or(config.poll_interval));
    log::info!(
        "Autoscaling cell {} ({} partition(s)) every {}",
        config.cell,
        autoscaler.partitions().len(),
        format_duration(interval)
    );
    autoscale_process(autoscaler, interval, mode).await;
    Ok(())
}

pub async fn command_plan(config: CellConfig) -> anyhow::Result<()> {
    let autoscaler = Autoscaler::new(create_clients(&config)?, &config);
    let plan = autoscaler.plan().await?;
    print_json(&plan)
}
