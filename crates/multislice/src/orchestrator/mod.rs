//! The orchestrator turns a set of independent slices into one logical distributed job.
//!
//! Starting a cohort provisions every slice, derives the coordinator address from slice 0,
//! submits one job per slice with the coordination environment and then waits until every slice
//! runs its job. Stopping a cohort cleans the jobs of every slice and optionally releases the
//! hardware.
pub mod config;

use std::collections::BTreeMap;
use std::net::Ipv6Addr;

use chrono::Local;
use futures::future::{join_all, try_join_all};
use tokio_util::sync::CancellationToken;

use crate::SliceIndex;
use crate::common::error::{MultisliceError, ShutdownStep, SliceFailure};
use crate::common::utils::str::pluralize;
use crate::job::{Cohort, JobDescriptor};
use crate::orchestrator::config::{OrchestratorConfig, current_user, generate_run_name};
use crate::slice::{JobHandle, JobNamespace, JobStatus, SliceController};

/// Parameters of a single training run provided by the operator.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Generated from the user name and the current time if missing.
    pub run_name: Option<String>,
    /// Generated from [`config::TrainingConfig::default_command`] if missing.
    pub command: Option<String>,
}

/// Information about a cohort whose jobs are all running.
#[derive(Debug, Clone)]
pub struct CohortRun {
    pub run_name: String,
    pub coordinator_address: String,
    /// Submitted jobs, indexed by slice ordinal.
    pub jobs: Vec<JobHandle>,
}

pub struct Orchestrator {
    slices: Vec<Box<dyn SliceController>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        slices: Vec<Box<dyn SliceController>>,
        config: OrchestratorConfig,
    ) -> crate::Result<Self> {
        if slices.is_empty() {
            return Err(MultisliceError::ConfigurationError(
                "At least one slice is required".to_string(),
            ));
        }
        if u32::try_from(slices.len()).is_err() {
            return Err(MultisliceError::ConfigurationError(format!(
                "Too many slices ({})",
                slices.len()
            )));
        }
        Ok(Self { slices, config })
    }

    pub fn slices(&self) -> &[Box<dyn SliceController>] {
        &self.slices
    }

    pub fn num_slices(&self) -> u32 {
        self.slices.len() as u32
    }

    /// Brings the cohort from unprovisioned slices to slices that all run their job.
    ///
    /// No job is submitted unless every slice is ready and the coordinator address is known.
    /// The final wait can be interrupted through `token`.
    pub async fn start(
        &mut self,
        options: RunOptions,
        token: &CancellationToken,
    ) -> crate::Result<CohortRun> {
        self.ensure_all_ready().await?;

        for (index, slice) in self.slices.iter_mut().enumerate() {
            if let Err(error) = slice.clean_stale_jobs(JobNamespace::Default).await {
                log::warn!("Cannot clean stale jobs of slice {index}: {error:#}");
            }
        }

        let coordinator_address = self.coordinator_address()?;
        let num_slices = self.num_slices();
        let run_name = options
            .run_name
            .unwrap_or_else(|| generate_run_name(&current_user(), &Local::now()));
        let command = options
            .command
            .unwrap_or_else(|| self.config.training.default_command(&run_name, num_slices));
        log::info!(
            "Starting run {run_name} on {num_slices} {} with coordinator {coordinator_address}",
            pluralize("slice", num_slices as usize)
        );

        let template = JobDescriptor::new(
            command,
            self.config.training.working_dir.clone(),
            self.config.training.dependencies.clone(),
            self.config.training.env.clone(),
        );
        let cohort = Cohort::from_template(&template, &coordinator_address, num_slices);
        cohort.validate()?;

        let mut jobs = Vec::with_capacity(cohort.len());
        for (index, (slice, descriptor)) in self
            .slices
            .iter_mut()
            .zip(cohort.into_descriptors())
            .enumerate()
        {
            let job = slice
                .submit_job(descriptor, JobNamespace::Default)
                .await
                .map_err(|source| MultisliceError::SubmissionError {
                    slice: index as SliceIndex,
                    source,
                })?;
            log::debug!("Submitted job {job} to slice {index}");
            jobs.push(job);
        }

        self.poll_until_running(token).await?;

        Ok(CohortRun {
            run_name,
            coordinator_address,
            jobs,
        })
    }

    /// Waits until every slice reports at least one running job.
    ///
    /// There is no timeout, the wait ends either when all slices run or when `token` is
    /// cancelled. A slice is counted only once, even if its job stops running later.
    pub async fn poll_until_running(&self, token: &CancellationToken) -> crate::Result<()> {
        let total = self.slices.len();
        let mut satisfied = vec![false; total];
        let mut running = 0;

        loop {
            for (index, slice) in self.slices.iter().enumerate() {
                if satisfied[index] {
                    continue;
                }
                let result = tokio::select! {
                    _ = token.cancelled() => return Err(MultisliceError::Cancelled),
                    result = slice.jobs_with_status(JobStatus::Running) => result,
                };
                match result {
                    Ok(jobs) if !jobs.is_empty() => {
                        satisfied[index] = true;
                        running += 1;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        log::warn!("Cannot query jobs of slice {index}: {error:#}");
                    }
                }
            }
            log::info!("{running}/{total} slices have a running job");
            if running == total {
                break;
            }

            tokio::select! {
                _ = token.cancelled() => return Err(MultisliceError::Cancelled),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        log::info!("All jobs are running:");
        for (index, slice) in self.slices.iter().enumerate() {
            for job in slice.queued_jobs() {
                log::info!("Job {job} @ slice {index}");
            }
        }
        Ok(())
    }

    /// Stops the jobs of every slice and, if `teardown` is set, releases the slices afterwards.
    ///
    /// Every slice is attempted even if some of them fail; the failures are returned together.
    pub async fn stop(&mut self, teardown: bool) -> crate::Result<()> {
        let mut failures = vec![];

        let results = join_all(
            self.slices
                .iter_mut()
                .map(|slice| slice.clean_stale_jobs(JobNamespace::Default)),
        )
        .await;
        collect_failures(results, ShutdownStep::Cleanup, &mut failures);
        log::info!("All jobs were requested to stop");

        if teardown {
            let results = join_all(self.slices.iter_mut().map(|slice| slice.teardown())).await;
            collect_failures(results, ShutdownStep::Teardown, &mut failures);
            log::info!("Teardown of all slices was requested");
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(MultisliceError::ShutdownError(failures))
        }
    }

    /// Runs an auxiliary job on every slice, outside of the cohort coordination.
    pub async fn profile(
        &mut self,
        entrypoint: &str,
        working_dir: &str,
    ) -> crate::Result<Vec<JobHandle>> {
        self.ensure_all_ready().await?;

        let mut jobs = Vec::with_capacity(self.slices.len());
        for (index, slice) in self.slices.iter_mut().enumerate() {
            let descriptor = JobDescriptor::new(
                entrypoint,
                working_dir,
                self.config.profile_dependencies.clone(),
                BTreeMap::new(),
            );
            let job = slice
                .submit_job(descriptor, JobNamespace::Profile)
                .await
                .map_err(|source| MultisliceError::SubmissionError {
                    slice: index as SliceIndex,
                    source,
                })?;
            log::info!("Job {job} @ slice {index}");
            jobs.push(job);
        }
        Ok(jobs)
    }

    /// Provisions all slices concurrently, the first failure aborts the others.
    async fn ensure_all_ready(&mut self) -> crate::Result<()> {
        let futures = self
            .slices
            .iter_mut()
            .enumerate()
            .map(|(index, slice)| async move {
                log::debug!("Waiting for slice {index} ({}) to be ready", slice.name());
                slice
                    .ensure_ready()
                    .await
                    .map_err(|source| MultisliceError::ProvisioningError {
                        slice: index as SliceIndex,
                        source,
                    })
            });
        try_join_all(futures).await?;
        log::info!("All slices are ready");
        Ok(())
    }

    fn coordinator_address(&self) -> crate::Result<String> {
        let address = self.slices[0].addresses().first().ok_or_else(|| {
            MultisliceError::ConfigurationError(format!(
                "Slice 0 ({}) has no network address",
                self.slices[0].name()
            ))
        })?;
        Ok(format_address(address, self.config.coordinator_port))
    }
}

fn format_address(host: &str, port: u16) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn collect_failures(
    results: Vec<anyhow::Result<()>>,
    step: ShutdownStep,
    failures: &mut Vec<SliceFailure>,
) {
    for (index, result) in results.into_iter().enumerate() {
        if let Err(error) = result {
            log::error!("Slice {index}: {step} failed: {error:#}");
            failures.push(SliceFailure {
                slice: index as SliceIndex,
                step,
                error,
            });
        }
    }
}
