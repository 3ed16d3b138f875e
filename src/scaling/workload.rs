//! Scale-up/scale-down protocol.
//!
//! A workload with `r` replicas is moved one replica away and back:
//! `r <= 1` goes up to `r + 1` then down to `r`, anything larger goes down to
//! `r - 1` then up to `r`. Zero is never requested.

use crate::engine::stop::StopSignal;
use crate::scaling::client::{ClientError, ResourceClient, ResourceRef};
use crate::scaling::convergence::{wait_for_convergence, DesiredState};
use crate::scaling::retry::retry_on_conflict;
use crate::scaling::{ScalingConfig, ScalingError};
use serde::Serialize;
use std::fmt;

/// Direction of a scaling step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    /// Back to the bounds found before the protocol started
    Restore,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
            Direction::Restore => f.write_str("restore"),
        }
    }
}

/// One planned step: direction and target replica count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingStep {
    pub direction: Direction,
    pub replicas: i32,
}

/// The two steps that move a workload off `replicas` and back.
pub fn scaling_sequence(replicas: i32) -> [ScalingStep; 2] {
    if replicas <= 1 {
        [
            ScalingStep {
                direction: Direction::Up,
                replicas: replicas + 1,
            },
            ScalingStep {
                direction: Direction::Down,
                replicas,
            },
        ]
    } else {
        [
            ScalingStep {
                direction: Direction::Down,
                replicas: replicas - 1,
            },
            ScalingStep {
                direction: Direction::Up,
                replicas,
            },
        ]
    }
}

/// A step that was applied and converged
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub direction: Direction,
    pub min: i32,
    pub max: i32,
    /// Update attempts, including conflicting ones
    pub attempts: u32,
}

/// Steps completed by a successful protocol run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScalingReport {
    pub steps: Vec<StepRecord>,
    /// Set when the final autoscaler restore failed after the steps passed
    pub restore_error: Option<String>,
}

impl ScalingReport {
    pub fn summary(&self) -> String {
        self.steps
            .iter()
            .map(|s| {
                if s.min == s.max {
                    format!("{} to {}", s.direction, s.min)
                } else {
                    format!("{} to {}..={}", s.direction, s.min, s.max)
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Scale a workload without an autoscaler away from its replica count and
/// back.
///
/// The second step restores the original count. It runs even when the first
/// step failed and it ignores `stop`, so the original value is always the last
/// one written.
pub async fn scale_workload(
    client: &dyn ResourceClient,
    target: &ResourceRef,
    config: &ScalingConfig,
    stop: &StopSignal,
) -> Result<ScalingReport, ScalingError> {
    let workload = client
        .get_workload(target)
        .await
        .map_err(|e| ScalingError::client(target, e))?;
    let [first, restore] = scaling_sequence(workload.replicas);
    tracing::info!(resource = %target, replicas = workload.replicas, "Scaling workload");

    let mut report = ScalingReport::default();
    let first_result = scale_replicas(client, target, first, config, stop).await;

    let restored = scale_replicas(client, target, restore, config, &StopSignal::never()).await;
    match (first_result, restored) {
        (Ok(first), Ok(restore)) => {
            report.steps.push(first);
            report.steps.push(restore);
            Ok(report)
        }
        (Err(e), restored) => {
            if let Err(restore_err) = restored {
                tracing::error!(
                    resource = %target,
                    "Cannot restore replicas to {}: {}",
                    restore.replicas,
                    restore_err
                );
            }
            Err(e)
        }
        (Ok(_), Err(e)) => Err(e),
    }
}

async fn scale_replicas(
    client: &dyn ResourceClient,
    target: &ResourceRef,
    step: ScalingStep,
    config: &ScalingConfig,
    stop: &StopSignal,
) -> Result<StepRecord, ScalingError> {
    tracing::debug!(
        resource = %target,
        direction = %step.direction,
        replicas = step.replicas,
        "Scaling step"
    );

    let mut attempts = 0;
    retry_on_conflict(&config.backoff, stop, ClientError::is_conflict, || {
        attempts += 1;
        async move {
            let mut workload = client.get_workload(target).await?;
            workload.replicas = step.replicas;
            client.update_workload(&workload).await
        }
    })
    .await
    .map_err(|e| ScalingError::from_retry(target, e))?;

    let desired = DesiredState::exact(target.clone(), step.replicas, config.step_timeout);
    wait_for_convergence(client, &desired, config.poll_interval, stop).await?;

    Ok(StepRecord {
        direction: step.direction,
        min: step.replicas,
        max: step.replicas,
        attempts,
    })
}

/// Scale an autoscaled workload by collapsing its autoscaler bounds onto one
/// value for each step, then put the original bounds back.
///
/// The final restore always runs and ignores `stop`. A failed restore is
/// logged and reported in [`ScalingReport::restore_error`]; it never replaces
/// the outcome of the steps.
pub async fn scale_autoscaled_workload(
    client: &dyn ResourceClient,
    autoscaler: &ResourceRef,
    config: &ScalingConfig,
    stop: &StopSignal,
) -> Result<ScalingReport, ScalingError> {
    let hpa = client
        .get_autoscaler(autoscaler)
        .await
        .map_err(|e| ScalingError::client(autoscaler, e))?;
    let workload_ref = hpa.scale_target.clone();
    let (original_min, original_max) = (hpa.min_replicas, hpa.max_replicas);

    let workload = client
        .get_workload(&workload_ref)
        .await
        .map_err(|e| ScalingError::client(&workload_ref, e))?;
    tracing::info!(
        resource = %workload_ref,
        autoscaler = %autoscaler,
        replicas = workload.replicas,
        min = hpa.min_replicas(),
        max = original_max,
        "Scaling autoscaled workload"
    );

    let mut report = ScalingReport::default();
    let mut result = Ok(());
    for step in scaling_sequence(workload.replicas) {
        let bounds = Bounds {
            direction: step.direction,
            min: Some(step.replicas),
            max: step.replicas,
        };
        match scale_bounds(client, autoscaler, &workload_ref, bounds, config, stop).await {
            Ok(record) => report.steps.push(record),
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }

    let restore = Bounds {
        direction: Direction::Restore,
        min: original_min,
        max: original_max,
    };
    let restored = scale_bounds(
        client,
        autoscaler,
        &workload_ref,
        restore,
        config,
        &StopSignal::never(),
    )
    .await;
    match restored {
        Ok(record) => report.steps.push(record),
        Err(e) => {
            tracing::warn!(
                autoscaler = %autoscaler,
                "Cannot restore autoscaler bounds {}..={}: {}",
                hpa.min_replicas(),
                original_max,
                e
            );
            report.restore_error = Some(e.to_string());
        }
    }

    result.map(|()| report)
}

/// Autoscaler bounds to write; an unset minimum means 1
#[derive(Debug, Clone, Copy)]
struct Bounds {
    direction: Direction,
    min: Option<i32>,
    max: i32,
}

async fn scale_bounds(
    client: &dyn ResourceClient,
    autoscaler: &ResourceRef,
    workload: &ResourceRef,
    bounds: Bounds,
    config: &ScalingConfig,
    stop: &StopSignal,
) -> Result<StepRecord, ScalingError> {
    tracing::debug!(
        autoscaler = %autoscaler,
        direction = %bounds.direction,
        min = ?bounds.min,
        max = bounds.max,
        "Scaling step"
    );

    let mut attempts = 0;
    retry_on_conflict(&config.backoff, stop, ClientError::is_conflict, || {
        attempts += 1;
        async move {
            let mut hpa = client.get_autoscaler(autoscaler).await?;
            hpa.min_replicas = bounds.min;
            hpa.max_replicas = bounds.max;
            client.update_autoscaler(&hpa).await
        }
    })
    .await
    .map_err(|e| ScalingError::from_retry(autoscaler, e))?;

    let min = bounds.min.unwrap_or(1);
    let desired = DesiredState::bounds(workload.clone(), min, bounds.max, config.step_timeout);
    wait_for_convergence(client, &desired, config.poll_interval, stop).await?;

    Ok(StepRecord {
        direction: bounds.direction,
        min,
        max: bounds.max,
        attempts,
    })
}
