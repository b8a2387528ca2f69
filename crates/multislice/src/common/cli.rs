use std::time::Duration;

use clap::Parser;

use crate::orchestrator::config::current_user;

// Allows specifying humantime format (2h, 3m, etc.)
crate::arg_wrapper!(ArgDuration, Duration, humantime::parse_duration);

// Common CLI options
#[derive(Parser)]
pub struct CommonOpts {
    /// Enables more detailed log output
    #[arg(
        long,
        env = "MSLICE_DEBUG",
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
    version(crate::MULTISLICE_VERSION),
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
    /// Provision slices and start a training run that spans all of them
    Start(StartOpts),
    /// Stop the training jobs of all slices
    Stop(StopOpts),
    /// Run an auxiliary (profiling) job on every slice
    Profile(ProfileOpts),
    /// Capture a trace from a profiler server running on this host
    Trace(TraceOpts),
}

/// Options that describe the set of slices
#[derive(Parser)]
pub struct SliceOpts {
    /// Number of slices
    #[arg(long, default_value_t = 2, env = "MSLICE_NUM_SLICES")]
    pub num_slices: u32,

    /// Name prefix of the TPU VMs, suffixed with the slice index (e.g. `alice-slice-0`).
    /// Defaults to `<user>-slice`.
    #[arg(long, env = "MSLICE_TPU_NAME")]
    pub tpu_name: Option<String>,

    /// Interconnect topology of each slice
    #[arg(long, default_value = "2x2x2")]
    pub tpu_topology: String,

    /// Accelerator type of each slice
    #[arg(long, default_value = "v4")]
    pub accelerator_type: String,

    /// Software image of the slice hosts
    #[arg(long, default_value = "tpu-vm-v4-base")]
    pub version: String,

    /// VPC network name
    #[arg(long, default_value = "default")]
    pub network: String,

    /// Subnet name under the VPC network
    #[arg(long, default_value = "default")]
    pub subnet: String,

    /// Cloud project of the slices. Defaults to the project configured in `gcloud`.
    #[arg(long, env = "MSLICE_PROJECT")]
    pub project: Option<String>,

    /// Zone of the slices
    #[arg(long, default_value = "us-central2-b", env = "MSLICE_ZONE")]
    pub zone: String,
}

impl SliceOpts {
    pub fn tpu_name_prefix(&self) -> String {
        self.tpu_name
            .clone()
            .unwrap_or_else(|| format!("{}-slice", current_user()))
    }
}

#[derive(Parser)]
pub struct StartOpts {
    #[clap(flatten)]
    pub slices: SliceOpts,

    /// Name of the run. Generated from the user name and the current time if not set.
    #[arg(long)]
    pub run_name: Option<String>,

    /// Command executed on every slice. A training command is generated if not set.
    #[arg(long)]
    pub command: Option<String>,

    /// Stop waiting for the jobs to run after this duration (e.g. `30m`)
    #[arg(long)]
    pub timeout: Option<ArgDuration>,
}

#[derive(Parser)]
pub struct StopOpts {
    #[clap(flatten)]
    pub slices: SliceOpts,

    /// Delete the TPU VMs after their jobs were stopped
    #[arg(long)]
    pub delete_tpu: bool,
}

#[derive(Parser)]
pub struct ProfileOpts {
    #[clap(flatten)]
    pub slices: SliceOpts,

    /// Command executed on every slice
    #[arg(long)]
    pub command: String,

    /// Working directory of the command
    #[arg(long, value_hint = clap::ValueHint::DirPath)]
    pub code_dir: String,
}

#[derive(Parser)]
pub struct TraceOpts {
    /// Port of the profiler server
    #[arg(long)]
    pub port: u16,

    /// Length of the captured trace (e.g. `10s`)
    #[arg(long)]
    pub duration: ArgDuration,

    /// Location (directory or bucket URL) where the trace is stored
    #[arg(long)]
    pub output: String,

    /// Python interpreter with TensorFlow installed
    #[arg(long, default_value = "python3")]
    pub python: String,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::{CommandFactory, Parser};

    use crate::common::cli::{RootOptions, SubCommand};

    #[test]
    fn cli_is_consistent() {
        RootOptions::command().debug_assert();
    }

    #[test]
    fn parse_start() {
        let opts = RootOptions::try_parse_from([
            "mslice",
            "start",
            "--num-slices",
            "4",
            "--tpu-name",
            "bob-slice",
            "--run-name",
            "run-1",
            "--timeout",
            "30m",
        ])
        .unwrap();
        let SubCommand::Start(opts) = opts.subcmd else {
            panic!("Expected start command");
        };
        assert_eq!(opts.slices.num_slices, 4);
        assert_eq!(opts.slices.tpu_name_prefix(), "bob-slice");
        assert_eq!(opts.slices.tpu_topology, "2x2x2");
        assert_eq!(opts.run_name.as_deref(), Some("run-1"));
        assert!(opts.command.is_none());
        assert_eq!(
            opts.timeout.map(|t| t.unpack()),
            Some(Duration::from_secs(30 * 60))
        );
    }

    #[test]
    fn parse_stop() {
        let opts = RootOptions::try_parse_from(["mslice", "stop", "--delete-tpu"]).unwrap();
        let SubCommand::Stop(opts) = opts.subcmd else {
            panic!("Expected stop command");
        };
        assert!(opts.delete_tpu);

        let opts = RootOptions::try_parse_from(["mslice", "stop"]).unwrap();
        let SubCommand::Stop(opts) = opts.subcmd else {
            panic!("Expected stop command");
        };
        assert!(!opts.delete_tpu);
    }

    #[test]
    fn profile_requires_command() {
        assert!(RootOptions::try_parse_from(["mslice", "profile", "--code-dir", "."]).is_err());
    }

    #[test]
    fn parse_trace() {
        let opts = RootOptions::try_parse_from([
            "mslice",
            "trace",
            "--port",
            "9999",
            "--duration",
            "10s",
            "--output",
            "gs://bucket/profile",
        ])
        .unwrap();
        let SubCommand::Trace(opts) = opts.subcmd else {
            panic!("Expected trace command");
        };
        assert_eq!(opts.port, 9999);
        assert_eq!(*opts.duration.get(), Duration::from_secs(10));
    }
}
