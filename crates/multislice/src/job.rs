//! Descriptions of work submitted to slices.
//!
//! A [`JobDescriptor`] is built once per submission and handed to exactly one slice. A
//! [`Cohort`] is the set of descriptors submitted together for one distributed run; each of its
//! descriptors carries the coordination environment that lets the slices find each other.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::SliceIndex;
use crate::common::error::MultisliceError;

/// Address of the coordinator that all slices of a cohort rendezvous with.
pub const COORDINATOR_ADDRESS_ENV: &str = "MEGASCALE_COORDINATOR_ADDRESS";
/// Ordinal of the slice that runs the job.
pub const SLICE_ID_ENV: &str = "MEGASCALE_SLICE_ID";
/// Number of slices in the cohort.
pub const NUM_SLICES_ENV: &str = "MEGASCALE_NUM_SLICES";

/// Packages required by the execution environment of a job.
/// They are only declared here, installation is up to the job backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySet {
    pub packages: Vec<String>,
    /// Check the consistency of installed packages after installation.
    pub pip_check: bool,
    /// Version requirement of the installer itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pip_version: Option<String>,
}

impl DependencySet {
    pub fn new<S: Into<String>>(packages: impl IntoIterator<Item = S>) -> Self {
        Self {
            packages: packages.into_iter().map(Into::into).collect(),
            pip_check: false,
            pip_version: None,
        }
    }

    pub fn with_pip_version(mut self, version: impl Into<String>) -> Self {
        self.pip_version = Some(version.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    entrypoint: String,
    /// Resolved on the execution side.
    working_dir: String,
    dependencies: DependencySet,
    env: BTreeMap<String, String>,
}

impl JobDescriptor {
    pub fn new(
        entrypoint: impl Into<String>,
        working_dir: impl Into<String>,
        dependencies: DependencySet,
        env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            entrypoint: entrypoint.into(),
            working_dir: working_dir.into(),
            dependencies,
            env,
        }
    }

    pub fn entrypoint(&self) -> &str {
        &self.entrypoint
    }

    pub fn working_dir(&self) -> &str {
        &self.working_dir
    }

    pub fn dependencies(&self) -> &DependencySet {
        &self.dependencies
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    fn with_cohort_env(
        &self,
        coordinator_address: &str,
        slice: SliceIndex,
        num_slices: u32,
    ) -> Self {
        let mut env = self.env.clone();
        env.insert(
            COORDINATOR_ADDRESS_ENV.to_string(),
            coordinator_address.to_string(),
        );
        env.insert(SLICE_ID_ENV.to_string(), slice.to_string());
        env.insert(NUM_SLICES_ENV.to_string(), num_slices.to_string());
        Self {
            env,
            ..self.clone()
        }
    }
}

/// Descriptors of a single distributed run, indexed by slice ordinal.
#[derive(Debug)]
pub struct Cohort {
    descriptors: Vec<JobDescriptor>,
}

impl Cohort {
    /// Creates one descriptor per slice from `template`, adding the coordination environment.
    pub fn from_template(
        template: &JobDescriptor,
        coordinator_address: &str,
        num_slices: u32,
    ) -> Self {
        let descriptors = (0..num_slices)
            .map(|slice| template.with_cohort_env(coordinator_address, slice, num_slices))
            .collect();
        Self { descriptors }
    }

    pub fn from_descriptors(descriptors: Vec<JobDescriptor>) -> Self {
        Self { descriptors }
    }

    pub fn descriptors(&self) -> &[JobDescriptor] {
        &self.descriptors
    }

    pub fn into_descriptors(self) -> Vec<JobDescriptor> {
        self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Checks that every descriptor uses the same coordinator address and cohort size and that
    /// the slice ordinals form exactly `0..N-1`.
    pub fn validate(&self) -> crate::Result<()> {
        let inconsistent = |message: String| {
            Err(MultisliceError::ConfigurationError(format!(
                "Inconsistent cohort: {message}"
            )))
        };
        if self.is_empty() {
            return inconsistent("no descriptors".to_string());
        }

        let num_slices = self.descriptors.len();
        let mut seen = vec![false; num_slices];
        let mut coordinator: Option<&str> = None;

        for (index, descriptor) in self.descriptors.iter().enumerate() {
            let get_key = |key: &str| -> crate::Result<&str> {
                descriptor.env.get(key).map(|v| v.as_str()).ok_or_else(|| {
                    MultisliceError::ConfigurationError(format!(
                        "Inconsistent cohort: descriptor {index} is missing {key}"
                    ))
                })
            };

            let address = get_key(COORDINATOR_ADDRESS_ENV)?;
            match coordinator {
                None => coordinator = Some(address),
                Some(expected) if expected != address => {
                    return inconsistent(format!(
                        "descriptor {index} uses coordinator {address}, expected {expected}"
                    ));
                }
                Some(_) => {}
            }

            let size = get_key(NUM_SLICES_ENV)?;
            if size.parse::<usize>().ok() != Some(num_slices) {
                return inconsistent(format!(
                    "descriptor {index} declares cohort size {size}, expected {num_slices}"
                ));
            }

            let slice = get_key(SLICE_ID_ENV)?;
            match slice.parse::<usize>() {
                Ok(slice) if slice < num_slices && !seen[slice] => seen[slice] = true,
                _ => {
                    return inconsistent(format!(
                        "descriptor {index} has invalid or duplicate slice id {slice}"
                    ));
                }
            }
        }
        Ok(())
    }
}
