//! Slice controller for Cloud TPU VMs that run their workloads through a Ray cluster.
//!
//! Hardware is managed with `gcloud compute tpus tpu-vm`, jobs with the `ray job` CLI. The Ray
//! head is expected to run on the orchestrator host; every TPU host joins it from its startup
//! script and advertises one unit of a custom resource per job namespace, so that jobs can be
//! pinned to the hosts of a specific slice.
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use serde::Deserialize;
use tempfile::TempDir;

use crate::job::JobDescriptor;
use crate::slice::command::run_command;
use crate::slice::{
    JobHandle, JobNamespace, JobStatus, SliceController, SliceFuture, SliceResult, SliceTopology,
};

/// Port of the Ray head (control plane) on the orchestrator host.
pub const DEFAULT_HEAD_PORT: u16 = 6379;
/// Port of the Ray job submission API on the orchestrator host.
pub const DEFAULT_JOB_API_PORT: u16 = 8265;

/// Upper bound of jobs returned by a single `ray list jobs` call (Ray's own default is 100).
const JOB_LIST_LIMIT: u32 = 10_000;

const STARTUP_SCRIPT_NAME: &str = "startup-script.sh";

/// How often is the TPU VM state checked while waiting for it to become ready.
fn get_ready_check_interval() -> Duration {
    std::env::var("MSLICE_READY_CHECK_INTERVAL_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_secs(30))
}

#[derive(Debug, Clone)]
pub struct TpuSliceParams {
    /// Name of the TPU VM.
    pub name: String,
    pub project: String,
    pub zone: String,
    pub topology: SliceTopology,
    pub network: String,
    pub subnetwork: String,
    /// Address (`host:port`) of the Ray head that the slice hosts join.
    pub head_address: String,
    /// URL of the Ray job submission API.
    pub job_api_address: String,
}

/// A job submitted to a slice. It consists of one Ray job per slice host.
struct SubmittedJob {
    handle: JobHandle,
    host_jobs: Vec<String>,
}

pub struct TpuSliceController {
    params: TpuSliceParams,
    addresses: Vec<String>,
    jobs: Vec<SubmittedJob>,
    handles: Vec<JobHandle>,
    submission_counter: u64,
    /// Program (and its leading arguments) used to invoke the Ray CLI.
    ray_command: Vec<String>,
}

impl TpuSliceController {
    pub fn new(params: TpuSliceParams) -> Self {
        Self {
            params,
            addresses: vec![],
            jobs: vec![],
            handles: vec![],
            submission_counter: 0,
            ray_command: vec!["ray".to_string()],
        }
    }

    /// Name of the Ray resource that pins jobs of `namespace` to the hosts of this slice.
    pub fn resource_name(&self, namespace: JobNamespace) -> String {
        match namespace {
            JobNamespace::Default => self.params.name.clone(),
            JobNamespace::Profile => format!("{}-profile", self.params.name),
        }
    }

    fn gcloud_arguments(&self, action: &str) -> Vec<String> {
        [
            "gcloud",
            "compute",
            "tpus",
            "tpu-vm",
            action,
            self.params.name.as_str(),
            "--project",
            self.params.project.as_str(),
            "--zone",
            self.params.zone.as_str(),
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect()
    }

    fn startup_script(&self) -> String {
        let resources: BTreeMap<String, u32> = [
            (self.resource_name(JobNamespace::Default), 1),
            (self.resource_name(JobNamespace::Profile), 1),
        ]
        .into();
        let resources = serde_json::to_string(&resources).unwrap_or_default();
        format!(
            "#!/bin/bash\npip3 install 'ray[default]'\nray start --address={} --resources='{}'\n",
            self.params.head_address, resources
        )
    }

    /// Arguments of `tpu-vm create`. The startup script is passed as a file, `--metadata` would
    /// split it at every comma.
    fn create_arguments(&self, startup_script: &Path) -> Vec<String> {
        let topology = &self.params.topology;
        let mut arguments = self.gcloud_arguments("create");
        arguments.extend([
            format!("--type={}", topology.accelerator_type),
            format!("--topology={}", topology.topology),
            format!("--version={}", topology.version),
            format!("--network={}", self.params.network),
            format!("--subnetwork={}", self.params.subnetwork),
            format!(
                "--metadata-from-file=startup-script={}",
                startup_script.display()
            ),
        ]);
        arguments
    }

    async fn create(&self) -> SliceResult<()> {
        let directory = TempDir::with_prefix("mslice")?;
        let script_path = directory.path().join(STARTUP_SCRIPT_NAME);
        std::fs::write(&script_path, self.startup_script()).with_context(|| {
            format!("Cannot write startup script into {}", script_path.display())
        })?;
        run_command(&self.create_arguments(&script_path)).await?;
        Ok(())
    }

    fn ray_arguments(&self, arguments: &[&str]) -> Vec<String> {
        self.ray_command
            .iter()
            .map(|arg| arg.as_str())
            .chain(arguments.iter().copied())
            .map(|arg| arg.to_string())
            .collect()
    }

    async fn describe(&self) -> SliceResult<Option<TpuNode>> {
        let mut arguments = self.gcloud_arguments("describe");
        arguments.push("--format=json".to_string());
        match run_command(&arguments).await {
            Ok(output) => Ok(Some(parse_node(&output)?)),
            Err(error) if format!("{error:#}").contains("NOT_FOUND") => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn submit_arguments(
        &self,
        submission_id: &str,
        descriptor: &JobDescriptor,
        namespace: JobNamespace,
    ) -> SliceResult<Vec<String>> {
        let mut runtime_env = serde_json::json!({
            "working_dir": descriptor.working_dir(),
            "env_vars": descriptor.env(),
        });
        if !descriptor.dependencies().is_empty() {
            runtime_env["pip"] = serde_json::to_value(descriptor.dependencies())?;
        }
        let resources: BTreeMap<String, u32> = [(self.resource_name(namespace), 1)].into();
        let resources = serde_json::to_string(&resources)?;

        let runtime_env = runtime_env.to_string();
        Ok(self.ray_arguments(&[
            "job",
            "submit",
            "--address",
            self.params.job_api_address.as_str(),
            "--no-wait",
            "--submission-id",
            submission_id,
            "--entrypoint-resources",
            resources.as_str(),
            "--runtime-env-json",
            runtime_env.as_str(),
            "--",
            descriptor.entrypoint(),
        ]))
    }

    async fn host_job_status(&self, submission_id: &str) -> SliceResult<JobStatus> {
        let output = run_command(&self.ray_arguments(&[
            "job",
            "status",
            "--address",
            self.params.job_api_address.as_str(),
            submission_id,
        ]))
        .await?;
        parse_job_status(&output)
    }

    async fn stop_host_job(&self, submission_id: &str) -> SliceResult<()> {
        run_command(&self.ray_arguments(&[
            "job",
            "stop",
            "--no-wait",
            "--address",
            self.params.job_api_address.as_str(),
            submission_id,
        ]))
        .await?;
        Ok(())
    }

    /// Stops host jobs of a partially submitted job, failures are only logged.
    async fn stop_host_jobs(&self, host_jobs: &[String]) {
        for submission_id in host_jobs {
            log::debug!("Stopping partially submitted job {submission_id}");
            if let Err(error) = self.stop_host_job(submission_id).await {
                log::warn!("Cannot stop job {submission_id}: {error:#}");
            }
        }
    }

    fn refresh_handles(&mut self) {
        self.handles = self.jobs.iter().map(|job| job.handle.clone()).collect();
    }
}

impl SliceController for TpuSliceController {
    fn name(&self) -> &str {
        &self.params.name
    }

    fn ensure_ready(&mut self) -> SliceFuture<'_, ()> {
        Box::pin(async move {
            let mut created = false;
            loop {
                match self.describe().await? {
                    None if created => {
                        anyhow::bail!("TPU VM {} disappeared during creation", self.params.name)
                    }
                    None => {
                        log::info!("Creating TPU VM {}", self.params.name);
                        self.create()
                            .await
                            .with_context(|| format!("Cannot create TPU VM {}", self.params.name))?;
                        created = true;
                        continue;
                    }
                    Some(node) => match node.state.as_str() {
                        "READY" => {
                            self.addresses = node.addresses();
                            log::debug!(
                                "TPU VM {} is ready, hosts: {}",
                                self.params.name,
                                self.addresses.join(", ")
                            );
                            return Ok(());
                        }
                        "CREATING" | "STARTING" | "RESTARTING" | "REPAIRING" => {}
                        state => anyhow::bail!(
                            "TPU VM {} is in state {state} and cannot become ready",
                            self.params.name
                        ),
                    },
                }
                log::info!("Waiting for TPU VM {} to become ready", self.params.name);
                tokio::time::sleep(get_ready_check_interval()).await;
            }
        })
    }

    fn clean_stale_jobs(&mut self, namespace: JobNamespace) -> SliceFuture<'_, ()> {
        Box::pin(async move {
            let resource = self.resource_name(namespace);
            let limit = JOB_LIST_LIMIT.to_string();
            let output = run_command(&self.ray_arguments(&[
                "list",
                "jobs",
                "--address",
                self.params.job_api_address.as_str(),
                "--format",
                "json",
                "--detail",
                "--limit",
                limit.as_str(),
            ]))
            .await
            .context("Cannot list jobs")?;

            let mut errors = vec![];
            for submission_id in select_stale_jobs(&output, &resource)? {
                log::debug!("Stopping job {submission_id} on slice {}", self.params.name);
                if let Err(error) = self.stop_host_job(&submission_id).await {
                    errors.push(format!("{submission_id}: {error:#}"));
                }
            }

            self.jobs.retain(|job| job.handle.namespace != namespace);
            self.refresh_handles();

            if !errors.is_empty() {
                anyhow::bail!("Cannot stop jobs\n{}", errors.join("\n"));
            }
            Ok(())
        })
    }

    fn addresses(&self) -> &[String] {
        &self.addresses
    }

    fn submit_job(
        &mut self,
        descriptor: JobDescriptor,
        namespace: JobNamespace,
    ) -> SliceFuture<'_, JobHandle> {
        Box::pin(async move {
            if self.addresses.is_empty() {
                anyhow::bail!("TPU VM {} is not ready", self.params.name);
            }
            self.submission_counter += 1;
            let job_id = format!(
                "{}-{}-{}",
                self.resource_name(namespace),
                Utc::now().format("%Y%m%d-%H%M%S"),
                self.submission_counter
            );

            // Every host of the slice runs its own copy of the workload
            let mut host_jobs = Vec::with_capacity(self.addresses.len());
            for host in 0..self.addresses.len() {
                let submission_id = format!("{job_id}-host{host}");
                let result = match self.submit_arguments(&submission_id, &descriptor, namespace) {
                    Ok(arguments) => run_command(&arguments).await.map(|_| ()),
                    Err(error) => Err(error),
                };
                if let Err(error) = result {
                    self.stop_host_jobs(&host_jobs).await;
                    return Err(error.context(format!("Cannot submit job {submission_id}")));
                }
                host_jobs.push(submission_id);
            }

            let handle = JobHandle {
                id: job_id,
                namespace,
            };
            self.jobs.push(SubmittedJob {
                handle: handle.clone(),
                host_jobs,
            });
            self.refresh_handles();
            Ok(handle)
        })
    }

    fn jobs_with_status(&self, status: JobStatus) -> SliceFuture<'_, Vec<JobHandle>> {
        Box::pin(async move {
            let mut result = vec![];
            for job in &self.jobs {
                let mut statuses = Vec::with_capacity(job.host_jobs.len());
                for submission_id in &job.host_jobs {
                    statuses.push(self.host_job_status(submission_id).await?);
                }
                if aggregate_status(&statuses) == status {
                    result.push(job.handle.clone());
                }
            }
            Ok(result)
        })
    }

    fn queued_jobs(&self) -> &[JobHandle] {
        &self.handles
    }

    fn teardown(&mut self) -> SliceFuture<'_, ()> {
        Box::pin(async move {
            let mut arguments = self.gcloud_arguments("delete");
            arguments.extend(["--quiet".to_string(), "--async".to_string()]);
            log::info!("Deleting TPU VM {}", self.params.name);
            run_command(&arguments)
                .await
                .with_context(|| format!("Cannot delete TPU VM {}", self.params.name))?;
            self.addresses.clear();
            self.jobs.clear();
            self.refresh_handles();
            Ok(())
        })
    }
}

/// Returns the project configured as the default of `gcloud`.
pub async fn get_default_project() -> SliceResult<String> {
    let project = run_command(&["gcloud", "config", "get-value", "project"]).await?;
    if project.is_empty() {
        anyhow::bail!("No default project is configured in gcloud");
    }
    Ok(project)
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TpuNode {
    state: String,
    #[serde(default)]
    network_endpoints: Vec<NetworkEndpoint>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct NetworkEndpoint {
    ip_address: String,
}

impl TpuNode {
    fn addresses(&self) -> Vec<String> {
        self.network_endpoints
            .iter()
            .map(|endpoint| endpoint.ip_address.clone())
            .collect()
    }
}

fn parse_node(output: &str) -> SliceResult<TpuNode> {
    serde_json::from_str(output)
        .with_context(|| format!("Cannot parse TPU VM description\n{output}"))
}

fn parse_ray_status(status: &str) -> SliceResult<JobStatus> {
    let status = match status {
        "PENDING" => JobStatus::Pending,
        "RUNNING" => JobStatus::Running,
        "STOPPED" => JobStatus::Stopped,
        "SUCCEEDED" => JobStatus::Succeeded,
        "FAILED" => JobStatus::Failed,
        _ => anyhow::bail!("Unknown Ray job status {}", status),
    };
    Ok(status)
}

/// Parses the output of `ray job status`.
fn parse_job_status(output: &str) -> SliceResult<JobStatus> {
    let status = output
        .lines()
        .map(|line| line.trim())
        .find(|line| line.starts_with("Status for job"))
        .and_then(|line| line.rsplit(": ").next())
        .ok_or_else(|| anyhow::anyhow!("Missing job status in ray output\n{output}"))?;
    parse_ray_status(status.trim())
}

#[derive(Deserialize, Debug)]
struct RayJobRecord {
    #[serde(default)]
    submission_id: Option<String>,
    status: String,
    #[serde(default)]
    entrypoint_resources: Option<BTreeMap<String, f64>>,
}

/// Selects unfinished jobs that were pinned to the given resource from the output of
/// `ray list jobs --format json`.
fn select_stale_jobs(output: &str, resource: &str) -> SliceResult<Vec<String>> {
    let records: Vec<RayJobRecord> = serde_json::from_str(output)
        .with_context(|| format!("Cannot parse Ray job list\n{output}"))?;
    let mut stale = vec![];
    for record in records {
        let Some(submission_id) = record.submission_id else {
            continue;
        };
        let pinned = record
            .entrypoint_resources
            .is_some_and(|resources| resources.contains_key(resource));
        if pinned && !parse_ray_status(&record.status)?.is_terminal() {
            stale.push(submission_id);
        }
    }
    Ok(stale)
}

/// Status of a job formed by a single Ray job on every host of a slice.
fn aggregate_status(statuses: &[JobStatus]) -> JobStatus {
    if statuses.contains(&JobStatus::Failed) {
        JobStatus::Failed
    } else if statuses.contains(&JobStatus::Stopped) {
        JobStatus::Stopped
    } else if statuses.iter().all(|s| *s == JobStatus::Succeeded) {
        JobStatus::Succeeded
    } else if statuses
        .iter()
        .all(|s| matches!(s, JobStatus::Running | JobStatus::Succeeded))
    {
        JobStatus::Running
    } else {
        JobStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::Path;

    use tempfile::TempDir;

    use crate::job::{DependencySet, JobDescriptor};
    use crate::slice::tpu::{
        TpuSliceController, TpuSliceParams, aggregate_status, parse_job_status, parse_node,
        select_stale_jobs,
    };
    use crate::slice::{JobNamespace, JobStatus, SliceController, SliceTopology};

    fn controller() -> TpuSliceController {
        TpuSliceController::new(TpuSliceParams {
            name: "alice-slice-0".to_string(),
            project: "proj".to_string(),
            zone: "us-central2-b".to_string(),
            topology: SliceTopology {
                accelerator_type: "v4".to_string(),
                topology: "2x2x2".to_string(),
                version: "tpu-vm-v4-base".to_string(),
            },
            network: "default".to_string(),
            subnetwork: "default".to_string(),
            head_address: "10.1.0.5:6379".to_string(),
            job_api_address: "http://10.1.0.5:8265".to_string(),
        })
    }

    #[test]
    fn parse_ready_node() {
        let node = parse_node(
            r#"{
                "name": "projects/proj/locations/us-central2-b/nodes/alice-slice-0",
                "state": "READY",
                "networkEndpoints": [
                    {"ipAddress": "10.0.0.1", "port": 8470},
                    {"ipAddress": "10.0.0.2", "port": 8470}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(node.state, "READY");
        assert_eq!(node.addresses(), vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn parse_creating_node_without_endpoints() {
        let node = parse_node(r#"{"state": "CREATING"}"#).unwrap();
        assert!(node.addresses().is_empty());
    }

    #[test]
    fn parse_status_output() {
        let output = "Job submission server address: http://10.1.0.5:8265\n\
                      Status for job 'alice-slice-0-1-host0': RUNNING\n\
                      Status message: Job is currently running.";
        assert_eq!(parse_job_status(output).unwrap(), JobStatus::Running);
        assert_eq!(
            parse_job_status("Status for job 'x': SUCCEEDED").unwrap(),
            JobStatus::Succeeded
        );
    }

    #[test]
    fn parse_status_output_invalid() {
        assert!(parse_job_status("no status here").is_err());
        assert!(parse_job_status("Status for job 'x': EXPLODED").is_err());
    }

    #[test]
    fn stale_jobs_are_selected_by_resource() {
        let output = r#"[
            {"submission_id": "a", "status": "RUNNING", "entrypoint_resources": {"alice-slice-0": 1.0}},
            {"submission_id": "b", "status": "PENDING", "entrypoint_resources": {"alice-slice-0": 1.0}},
            {"submission_id": "c", "status": "SUCCEEDED", "entrypoint_resources": {"alice-slice-0": 1.0}},
            {"submission_id": "d", "status": "RUNNING", "entrypoint_resources": {"alice-slice-1": 1.0}},
            {"submission_id": "e", "status": "RUNNING", "entrypoint_resources": {"alice-slice-0-profile": 1.0}},
            {"submission_id": null, "status": "RUNNING"},
            {"submission_id": "f", "status": "RUNNING"}
        ]"#;
        assert_eq!(
            select_stale_jobs(output, "alice-slice-0").unwrap(),
            vec!["a", "b"]
        );
        assert_eq!(
            select_stale_jobs(output, "alice-slice-0-profile").unwrap(),
            vec!["e"]
        );
    }

    #[test]
    fn aggregate_host_statuses() {
        use JobStatus::*;
        assert_eq!(aggregate_status(&[Running, Running]), Running);
        assert_eq!(aggregate_status(&[Running, Pending]), Pending);
        assert_eq!(aggregate_status(&[Running, Failed]), Failed);
        assert_eq!(aggregate_status(&[Stopped, Running]), Stopped);
        assert_eq!(aggregate_status(&[Succeeded, Succeeded]), Succeeded);
        assert_eq!(aggregate_status(&[Succeeded, Running]), Running);
    }

    #[test]
    fn namespace_resources_differ() {
        let controller = controller();
        assert_eq!(
            controller.resource_name(JobNamespace::Default),
            "alice-slice-0"
        );
        assert_eq!(
            controller.resource_name(JobNamespace::Profile),
            "alice-slice-0-profile"
        );
    }

    #[test]
    fn create_arguments_contain_topology() {
        let controller = controller();
        let arguments = controller.create_arguments(Path::new("/tmp/mslice/startup-script.sh"));
        assert_eq!(
            &arguments[..6],
            &["gcloud", "compute", "tpus", "tpu-vm", "create", "alice-slice-0"]
        );
        assert!(arguments.contains(&"--type=v4".to_string()));
        assert!(arguments.contains(&"--topology=2x2x2".to_string()));
        assert!(arguments.contains(&"--version=tpu-vm-v4-base".to_string()));

        // gcloud splits metadata values at commas, only a single key may be present
        let metadata = arguments
            .iter()
            .find_map(|arg| arg.strip_prefix("--metadata-from-file="))
            .unwrap();
        let keys: Vec<_> = metadata
            .split(',')
            .map(|item| item.split('=').next().unwrap())
            .collect();
        assert_eq!(keys, vec!["startup-script"]);
        assert_eq!(metadata, "startup-script=/tmp/mslice/startup-script.sh");
        assert!(!arguments.iter().any(|arg| arg.starts_with("--metadata=")));
    }

    #[test]
    fn startup_script_joins_head_with_slice_resources() {
        let script = controller().startup_script();
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("ray start --address=10.1.0.5:6379"));
        assert!(script.contains(r#"{"alice-slice-0":1,"alice-slice-0-profile":1}"#));
    }

    #[test]
    fn submit_arguments_carry_runtime_env() {
        let controller = controller();
        let mut env = BTreeMap::new();
        env.insert("MEGASCALE_SLICE_ID".to_string(), "0".to_string());
        let descriptor = JobDescriptor::new(
            "python3 train.py run_name=x",
            "~/maxtext",
            DependencySet::new(["jax[tpu]"]),
            env,
        );
        let arguments = controller
            .submit_arguments("job-1-host0", &descriptor, JobNamespace::Default)
            .unwrap();

        let value_of = |flag: &str| {
            let index = arguments.iter().position(|arg| arg == flag).unwrap();
            arguments[index + 1].clone()
        };
        assert_eq!(value_of("--submission-id"), "job-1-host0");
        assert_eq!(value_of("--address"), "http://10.1.0.5:8265");
        assert_eq!(value_of("--entrypoint-resources"), r#"{"alice-slice-0":1}"#);

        let runtime_env: serde_json::Value =
            serde_json::from_str(&value_of("--runtime-env-json")).unwrap();
        assert_eq!(runtime_env["working_dir"], "~/maxtext");
        assert_eq!(runtime_env["env_vars"]["MEGASCALE_SLICE_ID"], "0");
        assert_eq!(runtime_env["pip"]["packages"][0], "jax[tpu]");
        assert_eq!(arguments.last().unwrap(), "python3 train.py run_name=x");
    }

    /// Controller whose Ray CLI is a shell script that appends its arguments to `ray.log`.
    fn controller_with_fake_ray(dir: &TempDir, script: &str) -> TpuSliceController {
        let path = dir.path().join("fake-ray.sh");
        let log = dir.path().join("ray.log");
        std::fs::write(
            &path,
            format!("echo \"$*\" >> '{}'\n{script}", log.display()),
        )
        .unwrap();
        let mut controller = controller();
        controller.ray_command = vec!["sh".to_string(), path.display().to_string()];
        controller
    }

    fn ray_calls(dir: &TempDir) -> Vec<String> {
        std::fs::read_to_string(dir.path().join("ray.log"))
            .unwrap_or_default()
            .lines()
            .map(|line| line.to_string())
            .collect()
    }

    #[tokio::test]
    async fn partial_submission_stops_submitted_host_jobs() {
        let dir = TempDir::with_prefix("mslice").unwrap();
        let mut controller = controller_with_fake_ray(
            &dir,
            r#"case "$*" in *submit*host1*) exit 1;; esac"#,
        );
        controller.addresses = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];

        let descriptor = JobDescriptor::new(
            "python3 train.py",
            "/tmp",
            DependencySet::new(Vec::<String>::new()),
            BTreeMap::new(),
        );
        let result = controller
            .submit_job(descriptor, JobNamespace::Default)
            .await;
        assert!(result.is_err());
        assert!(controller.queued_jobs().is_empty());

        let calls = ray_calls(&dir);
        assert_eq!(calls.len(), 3);
        assert!(calls[0].starts_with("job submit"));
        assert!(calls[1].starts_with("job submit"));
        assert!(calls[2].starts_with("job stop --no-wait"));
        assert!(calls[2].ends_with("-host0"));
    }

    #[tokio::test]
    async fn clean_lists_jobs_without_default_limit() {
        let dir = TempDir::with_prefix("mslice").unwrap();
        let mut controller = controller_with_fake_ray(
            &dir,
            r#"case "$1" in list) echo '[{"submission_id": "old-host0", "status": "RUNNING", "entrypoint_resources": {"alice-slice-0": 1.0}}]';; esac"#,
        );
        controller
            .clean_stale_jobs(JobNamespace::Default)
            .await
            .unwrap();

        let calls = ray_calls(&dir);
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("list jobs"));
        assert!(calls[0].ends_with("--limit 10000"));
        assert!(calls[1].starts_with("job stop --no-wait"));
        assert!(calls[1].ends_with("old-host0"));
    }

    #[tokio::test]
    async fn submit_requires_ready_slice() {
        let mut controller = controller();
        assert!(controller.addresses().is_empty());
        let descriptor = JobDescriptor::new(
            "true",
            "/tmp",
            DependencySet::new(Vec::<String>::new()),
            BTreeMap::new(),
        );
        let result = controller
            .submit_job(descriptor, JobNamespace::Default)
            .await;
        assert!(result.is_err());
        assert!(controller.queued_jobs().is_empty());
    }
}
