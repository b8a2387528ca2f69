//! Slice controllers manage a single accelerator slice: a group of co-located accelerator hosts
//! that is provisioned, used and released as a unit.
//!
//! The orchestrator only talks to slices through the [`SliceController`] trait. The concrete
//! implementation ([`tpu::TpuSliceController`]) drives Cloud TPU VMs and a Ray job backend via
//! their command-line tools.
pub mod command;
pub mod tpu;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use crate::job::JobDescriptor;

pub type SliceResult<T> = anyhow::Result<T>;

/// Future returned by slice controller operations.
pub type SliceFuture<'a, T> = Pin<Box<dyn Future<Output = SliceResult<T>> + 'a>>;

/// Hardware shape of a slice. Fixed when the slice is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceTopology {
    /// Accelerator generation, e.g. `v4`.
    pub accelerator_type: String,
    /// Interconnect topology, e.g. `2x2x2`.
    pub topology: String,
    /// Software image of the slice hosts.
    pub version: String,
}

/// Logical bucket under which jobs are grouped on a slice.
///
/// Cleanup always targets a whole namespace, so training and auxiliary jobs live in different
/// namespaces and never remove each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobNamespace {
    /// Namespace of cohort (training) jobs.
    Default,
    /// Namespace of auxiliary jobs, e.g. trace capture.
    Profile,
}

impl Display for JobNamespace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            JobNamespace::Default => f.write_str("default"),
            JobNamespace::Profile => f.write_str("profile"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Stopped,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Stopped | JobStatus::Succeeded | JobStatus::Failed
        )
    }
}

/// Handle of a job that was submitted to a slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
    pub namespace: JobNamespace,
}

impl Display for JobHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.id, self.namespace)
    }
}

/// Handler that can provision a single slice and run jobs on it.
///
/// A controller is owned by exactly one orchestrator; none of the methods expect concurrent
/// callers.
pub trait SliceController {
    /// Name of the slice, used to correlate provisioning and cleanup.
    fn name(&self) -> &str;

    /// Provisions the slice (if needed) and waits until it is ready.
    /// Calling it on a slice that is already ready does not change anything.
    fn ensure_ready(&mut self) -> SliceFuture<'_, ()>;

    /// Stops and forgets all jobs of the given namespace.
    fn clean_stale_jobs(&mut self, namespace: JobNamespace) -> SliceFuture<'_, ()>;

    /// Network addresses of the slice hosts, in the order reported by the slice.
    /// Empty until the slice is ready.
    fn addresses(&self) -> &[String];

    /// Submits a job into the given namespace.
    /// Fails if the slice is not ready.
    fn submit_job(
        &mut self,
        descriptor: JobDescriptor,
        namespace: JobNamespace,
    ) -> SliceFuture<'_, JobHandle>;

    /// Returns the previously submitted jobs that are currently in the given `status`.
    fn jobs_with_status(&self, status: JobStatus) -> SliceFuture<'_, Vec<JobHandle>>;

    /// Jobs submitted through this controller that were not cleaned up yet.
    fn queued_jobs(&self) -> &[JobHandle];

    /// Releases the slice hardware. This cannot be undone.
    fn teardown(&mut self) -> SliceFuture<'_, ()>;
}
