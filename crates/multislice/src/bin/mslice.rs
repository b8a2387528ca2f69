use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use multislice::common::cli::{
    ProfileOpts, RootOptions, SliceOpts, StartOpts, StopOpts, SubCommand, TraceOpts,
};
use multislice::common::setup::setup_logging;
use multislice::common::utils::network::{get_hostname, resolve_host_address};
use multislice::orchestrator::config::OrchestratorConfig;
use multislice::orchestrator::{Orchestrator, RunOptions};
use multislice::profile::{TensorflowTraceClient, trace_local};
use multislice::slice::tpu::{
    DEFAULT_HEAD_PORT, DEFAULT_JOB_API_PORT, TpuSliceController, TpuSliceParams,
    get_default_project,
};
use multislice::slice::{SliceController, SliceTopology};

async fn create_orchestrator(opts: SliceOpts) -> anyhow::Result<Orchestrator> {
    let hostname = get_hostname(None)?;
    let head = resolve_host_address(&hostname, DEFAULT_HEAD_PORT).await?;
    let job_api_address = format!(
        "http://{}",
        SocketAddr::new(head.ip(), DEFAULT_JOB_API_PORT)
    );

    let project = match &opts.project {
        Some(project) => project.clone(),
        None => get_default_project().await?,
    };
    let prefix = opts.tpu_name_prefix();
    let topology = SliceTopology {
        accelerator_type: opts.accelerator_type,
        topology: opts.tpu_topology,
        version: opts.version,
    };

    log::debug!(
        "Using {} slice(s) named {prefix}-<index> in {project}/{}, head node {head}",
        opts.num_slices,
        opts.zone
    );

    let slices = (0..opts.num_slices)
        .map(|index| {
            Box::new(TpuSliceController::new(TpuSliceParams {
                name: format!("{prefix}-{index}"),
                project: project.clone(),
                zone: opts.zone.clone(),
                topology: topology.clone(),
                network: opts.network.clone(),
                subnetwork: opts.subnet.clone(),
                head_address: head.to_string(),
                job_api_address: job_api_address.clone(),
            })) as Box<dyn SliceController>
        })
        .collect();
    Ok(Orchestrator::new(slices, OrchestratorConfig::default())?)
}

/// Cancels the returned token on Ctrl-C or after `timeout` elapses.
fn cancel_on_interrupt(timeout: Option<Duration>) -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        let deadline = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, stopping the wait");
            }
            _ = deadline => {
                log::warn!("Jobs did not start in time, stopping the wait");
            }
        }
        child.cancel();
    });
    token
}

// Commands

async fn command_start(opts: StartOpts) -> anyhow::Result<()> {
    let mut orchestrator = create_orchestrator(opts.slices).await?;
    let token = cancel_on_interrupt(opts.timeout.map(|t| t.unpack()));
    let run = orchestrator
        .start(
            RunOptions {
                run_name: opts.run_name,
                command: opts.command,
            },
            &token,
        )
        .await?;
    log::info!(
        "Run {} is running on {} slice(s), coordinator {}",
        run.run_name,
        run.jobs.len(),
        run.coordinator_address
    );
    Ok(())
}

async fn command_stop(opts: StopOpts) -> anyhow::Result<()> {
    let mut orchestrator = create_orchestrator(opts.slices).await?;
    orchestrator.stop(opts.delete_tpu).await?;
    log::info!("All slices were stopped");
    Ok(())
}

async fn command_profile(opts: ProfileOpts) -> anyhow::Result<()> {
    let mut orchestrator = create_orchestrator(opts.slices).await?;
    let jobs = orchestrator.profile(&opts.command, &opts.code_dir).await?;
    for job in jobs {
        log::info!("Submitted profiling job {job}");
    }
    Ok(())
}

async fn command_trace(opts: TraceOpts) -> anyhow::Result<()> {
    let client = TensorflowTraceClient::new(opts.python);
    trace_local(&client, opts.port, &opts.output, opts.duration.unpack()).await?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> multislice::Result<()> {
    let top_opts = RootOptions::parse();
    setup_logging(top_opts.common.debug);

    let result = match top_opts.subcmd {
        SubCommand::Start(opts) => command_start(opts).await,
        SubCommand::Stop(opts) => command_stop(opts).await,
        SubCommand::Profile(opts) => command_profile(opts).await,
        SubCommand::Trace(opts) => command_trace(opts).await,
    };

    if let Err(e) = result {
        log::error!("{e:#}");
        std::process::exit(1);
    }

    Ok(())
}
