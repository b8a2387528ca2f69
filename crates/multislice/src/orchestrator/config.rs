use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;

use chrono::{DateTime, TimeZone};

use crate::job::DependencySet;

/// Port of the coordinator that the workload of slice 0 listens on.
pub const DEFAULT_COORDINATOR_PORT: u16 = 8080;

/// Minimum time between two sweeps over the slices while waiting for the cohort to run.
pub fn get_poll_interval() -> Duration {
    get_duration_from_env("MSLICE_POLL_INTERVAL_MS").unwrap_or_else(|| Duration::from_secs(10))
}

fn get_duration_from_env(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
}

const PIP_VERSION: &str = "==20.0.2;python_full_version=='3.8.10'";

/// Settings of the training workload started on every slice.
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Working directory of the workload, resolved on the slice hosts.
    pub working_dir: String,
    /// Base of the default command, run-specific arguments are appended to it.
    pub script: String,
    pub ici_data_parallelism: u32,
    pub enable_checkpointing: bool,
    pub dependencies: DependencySet,
    /// Environment shared by every slice, the cohort variables are added on top of it.
    pub env: BTreeMap<String, String>,
}

impl TrainingConfig {
    /// Command used when the operator does not provide one.
    pub fn default_command(&self, run_name: &str, num_slices: u32) -> String {
        format!(
            "{} run_name={} dcn_data_parallelism={} ici_data_parallelism={} enable_checkpointing={}",
            self.script,
            run_name,
            num_slices,
            self.ici_data_parallelism,
            if self.enable_checkpointing {
                "True"
            } else {
                "False"
            }
        )
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let dependencies = DependencySet::new([
            "jax[tpu]",
            "orbax-checkpoint",
            "absl-py",
            "argparse",
            "datetime",
            "google-cloud-storage",
            "ml-collections",
            "numpy",
            "optax",
            "portpicker",
            "protobuf==3.20.3",
            "pylint",
            "pytest",
            "sentencepiece==0.1.97",
            "tensorflow",
            "tensorflow-datasets",
            "tensorboard-plugin-profile",
            "tensorflow-text",
            "tensorboardx",
            "flax",
            "-f https://storage.googleapis.com/jax-releases/libtpu_releases.html",
        ])
        .with_pip_version(PIP_VERSION);

        let mut env = BTreeMap::new();
        env.insert(
            "LIBTPU_INIT_ARGS".to_string(),
            "\"--xla_tpu_enable_megascale_barrier=true\"".to_string(),
        );
        env.insert("JAX_USE_PJRT_C_API_ON_TPU".to_string(), "1".to_string());

        Self {
            working_dir: "~/maxtext/MaxText".to_string(),
            script: "python3 train.py configs/base.yml".to_string(),
            ici_data_parallelism: 2,
            enable_checkpointing: true,
            dependencies,
            env,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub coordinator_port: u16,
    pub poll_interval: Duration,
    pub training: TrainingConfig,
    /// Dependencies of auxiliary (profiling) jobs.
    pub profile_dependencies: DependencySet,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            coordinator_port: DEFAULT_COORDINATOR_PORT,
            poll_interval: get_poll_interval(),
            training: TrainingConfig::default(),
            profile_dependencies: DependencySet::new(["tensorflow", "absl-py"])
                .with_pip_version(PIP_VERSION),
        }
    }
}

/// Name of the user that runs the orchestrator.
pub fn current_user() -> String {
    ["LOGNAME", "USER", "LNAME", "USERNAME"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|user| !user.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Creates a run name from the user and a timestamp with a second precision.
pub fn generate_run_name<Tz: TimeZone>(user: &str, now: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    format!("{user}_{}", now.format("%Y-%m-%d-%H-%M-%S"))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::orchestrator::config::{TrainingConfig, generate_run_name};

    #[test]
    fn run_name_contains_user_and_time() {
        let now = Utc.with_ymd_and_hms(2023, 5, 13, 8, 4, 59).unwrap();
        assert_eq!(generate_run_name("alice", &now), "alice_2023-05-13-08-04-59");
    }

    #[test]
    fn run_names_differ_by_timestamp() {
        let first = Utc.with_ymd_and_hms(2023, 5, 13, 8, 4, 59).unwrap();
        let second = Utc.with_ymd_and_hms(2023, 5, 13, 8, 5, 0).unwrap();
        assert_ne!(
            generate_run_name("alice", &first),
            generate_run_name("alice", &second)
        );
    }

    #[test]
    fn default_command_embeds_run_parameters() {
        let config = TrainingConfig::default();
        assert_eq!(
            config.default_command("alice_run", 4),
            "python3 train.py configs/base.yml run_name=alice_run dcn_data_parallelism=4 \
             ici_data_parallelism=2 enable_checkpointing=True"
        );
    }

    #[test]
    fn default_command_without_checkpointing() {
        let config = TrainingConfig {
            script: "python3 main.py".to_string(),
            ici_data_parallelism: 4,
            enable_checkpointing: false,
            ..Default::default()
        };
        assert_eq!(
            config.default_command("r", 1),
            "python3 main.py run_name=r dcn_data_parallelism=1 ici_data_parallelism=4 \
             enable_checkpointing=False"
        );
    }
}
