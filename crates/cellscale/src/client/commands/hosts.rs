use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use serde::Serialize;

use crate::autoscale::hostname::generate_hostname;
use crate::autoscale::placement::{BatchError, PlacementRequest};
use crate::autoscale::process::Autoscaler;
use crate::client::commands::create_clients;
use crate::client::output::print_json;
use crate::cluster::{HostDescriptor, Lifecycle, Partition, Placement};
use crate::common::config::CellConfig;
use crate::{Hostname, PartitionId};

#[derive(Parser)]
pub struct CreateOpts {
    /// Partition where the hosts will be created
    #[arg(long)]
    pub partition: PartitionId,

    /// Number of hosts to create
    #[arg(long)]
    pub count: u32,

    /// Overrides `min-on-demand` of the partition
    #[arg(long)]
    pub min_on_demand: Option<u32>,

    /// Overrides `max-on-demand` of the partition
    #[arg(long)]
    pub max_on_demand: Option<u32>,
}

#[derive(Parser)]
pub struct DeleteOpts {
    /// Hostnames to decommission
    #[arg(conflicts_with = "partition")]
    pub names: Vec<Hostname>,

    /// Decommission the oldest hosts of this partition
    #[arg(long, requires = "count")]
    pub partition: Option<PartitionId>,

    /// How many hosts to decommission from `--partition`
    #[arg(long, requires = "partition")]
    pub count: Option<usize>,
}

#[derive(Parser)]
pub struct ProvisionOpts {
    /// Partition of the host
    #[arg(long)]
    pub partition: PartitionId,

    /// Instance type to launch
    #[arg(long)]
    pub instance_type: String,

    /// Subnet to launch the instance in
    #[arg(long)]
    pub subnet: String,

    /// Launch a spot instance instead of an on-demand one
    #[arg(long)]
    pub spot: bool,

    /// Hostname of the new host (generated when not given)
    #[arg(long)]
    pub hostname: Option<Hostname>,
}

#[derive(Serialize)]
struct PartialBatch<'a> {
    created: &'a [HostDescriptor],
    failed_index: usize,
    failed_hostname: &'a str,
    error: String,
}

fn get_partition(autoscaler: &Autoscaler, id: &str) -> anyhow::Result<Partition> {
    autoscaler
        .partition(id)
        .cloned()
        .with_context(|| format!("Partition `{id}` is not configured"))
}

/// Applies the command line overrides to the on-demand bounds of the partition.
fn create_request(partition: &Partition, opts: &CreateOpts) -> anyhow::Result<PlacementRequest> {
    let defaults = PlacementRequest::for_partition(partition, opts.count);
    let request = PlacementRequest {
        count: opts.count,
        min_on_demand: opts.min_on_demand.or(defaults.min_on_demand),
        max_on_demand: opts.max_on_demand.or(defaults.max_on_demand),
    };
    if let (Some(min), Some(max)) = (request.min_on_demand, request.max_on_demand) {
        if min > max {
            anyhow::bail!(
                "`min-on-demand` ({min}) is larger than `max-on-demand` ({max}) for partition `{}`",
                partition.id
            );
        }
    }
    Ok(request)
}

pub async fn command_create(config: CellConfig, opts: CreateOpts) -> anyhow::Result<()> {
    let autoscaler = Autoscaler::new(create_clients(&config)?, &config);
    let partition = get_partition(&autoscaler, &opts.partition)?;
    let request = create_request(&partition, &opts)?;

    match autoscaler
        .placement_engine()
        .create_n(&partition, &request)
        .await
    {
        Ok(hosts) => print_json(&hosts),
        Err(BatchError {
            created,
            index,
            hostname,
            cause,
        }) => {
            let cause = anyhow::Error::from(cause);
            print_json(&PartialBatch {
                created: &created,
                failed_index: index,
                failed_hostname: &hostname,
                error: format!("{cause:#}"),
            })?;
            Err(cause.context(format!(
                "Created {} of {} host(s), cannot place {hostname}",
                created.len(),
                opts.count
            )))
        }
    }
}

pub async fn command_delete(config: CellConfig, opts: DeleteOpts) -> anyhow::Result<()> {
    let autoscaler = Autoscaler::new(create_clients(&config)?, &config);
    let engine = autoscaler.decommission_engine();
    let report = match (opts.partition, opts.count) {
        (Some(partition), Some(count)) => {
            get_partition(&autoscaler, &partition)?;
            engine.delete_n(count, &partition).await?
        }
        _ if !opts.names.is_empty() => engine.delete_by_name(&opts.names).await,
        _ => anyhow::bail!("Specify hostnames or `--partition` with `--count`"),
    };
    print_json(&report)?;
    if !report.is_success() {
        anyhow::bail!("{} host(s) could not be decommissioned", report.failed.len());
    }
    Ok(())
}

pub async fn command_provision(config: CellConfig, opts: ProvisionOpts) -> anyhow::Result<()> {
    let autoscaler = Autoscaler::new(create_clients(&config)?, &config);
    let partition = get_partition(&autoscaler, &opts.partition)?;
    let hostname = opts.hostname.unwrap_or_else(|| {
        generate_hostname(&config.cell, &partition.id, &config.domain, Utc::now(), 0)
    });
    let placement = Placement {
        instance_type: opts.instance_type,
        subnet: opts.subnet,
        lifecycle: if opts.spot {
            Lifecycle::Spot
        } else {
            Lifecycle::OnDemand
        },
    };
    let host = autoscaler
        .orchestrator()
        .provision(&hostname, &partition, &placement)
        .await
        .with_context(|| format!("Cannot provision {hostname}"))?;
    print_json(&host)
}

#[cfg(test)]
mod tests {
    use crate::client::commands::hosts::{CreateOpts, create_request};
    use crate::tests::utils::TestPartitionBuilder;

    fn opts(min_on_demand: Option<u32>, max_on_demand: Option<u32>) -> CreateOpts {
        CreateOpts {
            partition: "gpu".to_string(),
            count: 3,
            min_on_demand,
            max_on_demand,
        }
    }

    #[test]
    fn overrides_take_precedence() {
        let partition = TestPartitionBuilder::default()
            .min_on_demand(Some(1))
            .max_on_demand(Some(4))
            .build();
        let request = create_request(&partition, &opts(None, Some(2))).unwrap();
        assert_eq!(request.count, 3);
        assert_eq!(request.min_on_demand, Some(1));
        assert_eq!(request.max_on_demand, Some(2));
    }

    #[test]
    fn reject_max_below_configured_min() {
        let partition = TestPartitionBuilder::default()
            .min_on_demand(Some(2))
            .build();
        assert!(create_request(&partition, &opts(None, Some(0))).is_err());
        assert!(create_request(&partition, &opts(Some(0), Some(0))).is_ok());
    }
}
