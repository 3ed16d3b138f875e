//! Scaling protocol for checks that mutate live workloads.
//!
//! Each step is a conflict-retried update followed by a readiness poll, and
//! every protocol ends by putting the original replica count (or autoscaler
//! bounds) back, even when an earlier step failed.

pub mod client;
pub mod convergence;
pub mod retry;
pub mod workload;

use client::{ClientError, ResourceRef};
use retry::{Backoff, RetryError};
use std::time::Duration;

pub use client::ResourceClient;
pub use workload::{scale_autoscaled_workload, scale_workload, ScalingReport};

/// Settings shared by every scaling step
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingConfig {
    /// Convergence timeout of a single step
    pub step_timeout: Duration,
    pub poll_interval: Duration,
    pub backoff: Backoff,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        ScalingConfig {
            step_timeout: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(1),
            backoff: Backoff::default(),
        }
    }
}

/// Errors from a scaling step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScalingError {
    #[error("{target}: update still conflicting after {attempts} attempts")]
    ConflictExhausted { target: ResourceRef, attempts: u32 },

    #[error("{target}: {source}")]
    Client {
        target: ResourceRef,
        #[source]
        source: ClientError,
    },

    #[error("{target} not ready with {min}..={max} replicas after {timeout:?}")]
    ConvergenceTimeout {
        target: ResourceRef,
        min: i32,
        max: i32,
        timeout: Duration,
    },

    #[error("scaling aborted")]
    Aborted,
}

impl ScalingError {
    pub(crate) fn client(target: &ResourceRef, source: ClientError) -> Self {
        ScalingError::Client {
            target: target.clone(),
            source,
        }
    }

    pub(crate) fn from_retry(target: &ResourceRef, err: RetryError<ClientError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, .. } => ScalingError::ConflictExhausted {
                target: target.clone(),
                attempts,
            },
            RetryError::Failed(source) => Self::client(target, source),
            RetryError::Aborted => ScalingError::Aborted,
        }
    }

    /// The workload did not behave as required, as opposed to the check
    /// being unable to drive it.
    pub fn is_assertion_failure(&self) -> bool {
        matches!(self, ScalingError::ConvergenceTimeout { .. })
    }
}
