use clap::{CommandFactory, FromArgMatches};

use cellscale::client::commands::autoscale::{command_plan, command_run};
use cellscale::client::commands::hosts::{command_create, command_delete, command_provision};
use cellscale::common::cli::{RootOptions, SubCommand};
use cellscale::common::config::load_config;
use cellscale::common::setup::setup_logging;

async fn dispatch(opts: RootOptions) -> anyhow::Result<()> {
    let config = load_config(&opts.common.config)?;
    match opts.subcmd {
        SubCommand::Run(opts) => command_run(config, opts).await,
        SubCommand::Plan => command_plan(config).await,
        SubCommand::Create(opts) => command_create(config, opts).await,
        SubCommand::Delete(opts) => command_delete(config, opts).await,
        SubCommand::Provision(opts) => command_provision(config, opts).await,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> cellscale::Result<()> {
    let matches = RootOptions::command().get_matches();
    let top_opts = match RootOptions::from_arg_matches(&matches) {
        Ok(opts) => opts,
        Err(error) => error.exit(),
    };

    setup_logging(top_opts.common.debug);

    if let Err(e) = dispatch(top_opts).await {
        log::error!("{e:?}");
        std::process::exit(1);
    }

    Ok(())
}
