//! Readiness polling after a scaling update.

use crate::engine::stop::StopSignal;
use crate::scaling::client::{ResourceClient, ResourceRef, Workload};
use crate::scaling::ScalingError;
use std::time::Duration;
use tokio::time::Instant;

/// Replica bounds a workload must settle into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    pub target: ResourceRef,
    pub min: i32,
    pub max: i32,
    pub timeout: Duration,
}

impl DesiredState {
    pub fn exact(target: ResourceRef, replicas: i32, timeout: Duration) -> Self {
        Self::bounds(target, replicas, replicas, timeout)
    }

    pub fn bounds(target: ResourceRef, min: i32, max: i32, timeout: Duration) -> Self {
        DesiredState {
            target,
            min,
            max,
            timeout,
        }
    }

    pub fn is_satisfied_by(&self, workload: &Workload) -> bool {
        workload.is_ready() && (self.min..=self.max).contains(&workload.replicas)
    }
}

/// Poll the workload every `poll` until it satisfies `desired`.
///
/// Transient read errors are logged and polling continues; only the timeout
/// or `stop` end the wait early.
pub async fn wait_for_convergence(
    client: &dyn ResourceClient,
    desired: &DesiredState,
    poll: Duration,
    stop: &StopSignal,
) -> Result<Workload, ScalingError> {
    let now = Instant::now();
    // Timeouts too large for the clock never expire
    let deadline = now.checked_add(desired.timeout);

    loop {
        if stop.is_stopped() {
            return Err(ScalingError::Aborted);
        }

        match client.observe_workload(&desired.target).await {
            Ok(workload) if desired.is_satisfied_by(&workload) => {
                tracing::debug!(resource = %desired.target, replicas = workload.replicas, "Workload ready");
                return Ok(workload);
            }
            Ok(workload) => tracing::trace!(
                resource = %desired.target,
                replicas = workload.replicas,
                ready = workload.status.ready,
                "Waiting for workload"
            ),
            Err(e) => tracing::debug!(resource = %desired.target, "Cannot observe workload: {}", e),
        }

        let now = Instant::now();
        if deadline.is_some_and(|deadline| now >= deadline) {
            return Err(ScalingError::ConvergenceTimeout {
                target: desired.target.clone(),
                min: desired.min,
                max: desired.max,
                timeout: desired.timeout,
            });
        }

        let wait = match deadline {
            Some(deadline) => poll.min(deadline - now),
            None => poll,
        };
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = stop.stopped() => return Err(ScalingError::Aborted),
        }
    }
}
