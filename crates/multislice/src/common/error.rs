use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::SliceIndex;

#[derive(Debug, Error)]
pub enum MultisliceError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Provisioning of slice {slice} failed: {source:#}")]
    ProvisioningError {
        slice: SliceIndex,
        source: anyhow::Error,
    },
    #[error("Job submission to slice {slice} failed: {source:#}")]
    SubmissionError {
        slice: SliceIndex,
        source: anyhow::Error,
    },
    #[error("{}", format_failures(.0))]
    ShutdownError(Vec<SliceFailure>),
    #[error("Waiting was cancelled")]
    Cancelled,
    #[error("Error: {0}")]
    GenericError(String),
}

/// Best-effort step of a shutdown that can fail independently on each slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStep {
    Cleanup,
    Teardown,
}

impl Display for ShutdownStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownStep::Cleanup => f.write_str("job cleanup"),
            ShutdownStep::Teardown => f.write_str("teardown"),
        }
    }
}

#[derive(Debug)]
pub struct SliceFailure {
    pub slice: SliceIndex,
    pub step: ShutdownStep,
    pub error: anyhow::Error,
}

fn format_failures(failures: &[SliceFailure]) -> String {
    let mut message = format!(
        "{} slice {} failed:",
        failures.len(),
        crate::common::utils::str::pluralize("operation", failures.len())
    );
    for failure in failures {
        message.push_str(&format!(
            "\n  slice {} ({}): {:#}",
            failure.slice, failure.step, failure.error
        ));
    }
    message
}

impl From<anyhow::Error> for MultisliceError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(format!("{error:#}"))
    }
}
