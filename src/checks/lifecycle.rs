//! Lifecycle checks (group `lifecycle`).
//!
//! Workload scaling: every target workload is scaled one replica away from
//! its current count and back, directly or through its autoscaler, and must
//! become fully ready after each step.

use crate::catalog::{Catalog, CatalogEntry};
use crate::engine::check::{Check, CheckContext, CheckError, CheckOutcome};
use crate::engine::registry::ChecksDb;
use crate::scaling::client::{Autoscaler, ResourceClient, ResourceRef, Workload};
use crate::scaling::workload::{scale_autoscaled_workload, scale_workload};
use crate::scaling::{ScalingConfig, ScalingError};
use crate::EngineError;
use std::sync::Arc;

pub const GROUP_NAME: &str = "lifecycle";
pub const WORKLOAD_SCALING: &str = "lifecycle-workload-scaling";

/// A workload under test and, if any, the autoscaler driving it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingTarget {
    pub workload: ResourceRef,
    pub autoscaler: Option<ResourceRef>,
}

impl ScalingTarget {
    /// Pair each workload with the autoscaler targeting it.
    pub fn discover(workloads: &[ResourceRef], autoscalers: &[Autoscaler]) -> Vec<ScalingTarget> {
        workloads
            .iter()
            .map(|workload| ScalingTarget {
                workload: workload.clone(),
                autoscaler: find_autoscaler(autoscalers, workload).map(|hpa| hpa.target.clone()),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LifecycleConfig {
    pub scaling: ScalingConfig,
    /// Names of workloads scaled by their owner rather than directly
    pub managed_workloads: Vec<String>,
    /// Owner kinds (custom resources) known to be scalable
    pub scalable_owner_kinds: Vec<String>,
}

/// Autoscaler whose scale target is `workload`
pub fn find_autoscaler<'a>(
    autoscalers: &'a [Autoscaler],
    workload: &ResourceRef,
) -> Option<&'a Autoscaler> {
    autoscalers.iter().find(|hpa| {
        hpa.scale_target.kind == workload.kind
            && hpa.scale_target.name == workload.name
            && hpa.scale_target.namespace == workload.namespace
    })
}

/// Whether the workload named `name` is on the managed list
pub fn is_managed(name: &str, managed_workloads: &[String]) -> bool {
    managed_workloads.iter().any(|managed| managed == name)
}

/// Whether one of the workload's owners is of a scalable kind
pub fn has_scalable_owner(workload: &Workload, scalable_owner_kinds: &[String]) -> bool {
    workload
        .owner_kinds
        .iter()
        .any(|kind| scalable_owner_kinds.contains(kind))
}

/// Catalog entries for the checks in this module
pub fn catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.insert(
        WORKLOAD_SCALING,
        CatalogEntry::new(
            "Tests that the workload can scale in and out, directly or through its \
             horizontal autoscaler, and returns to full readiness after each step.",
            "Make sure the workload can be scaled by one replica in either direction \
             and that its pods become ready within the scaling timeout.",
        )
        .with_reference("Workload scaling best practices")
        .with_exception_process("No exceptions")
        .with_classification("Extended", "Mandatory")
        .with_classification("FarEdge", "Optional")
        .with_classification("NonTelco", "Optional")
        .with_classification("Telco", "Mandatory"),
    );
    catalog
}

/// Register the lifecycle checks.
pub fn load_checks(
    db: &mut ChecksDb,
    client: Arc<dyn ResourceClient>,
    targets: Vec<ScalingTarget>,
    config: LifecycleConfig,
) -> Result<(), EngineError> {
    let targets = Arc::new(targets);
    let config = Arc::new(config);

    db.register(
        GROUP_NAME,
        Check::new(WORKLOAD_SCALING, "Workload scaling", move |ctx| {
            let client = Arc::clone(&client);
            let targets = Arc::clone(&targets);
            let config = Arc::clone(&config);
            async move { test_workload_scaling(ctx, client.as_ref(), &targets, &config).await }
        })
        .with_labels(["common", "extended"]),
    )
}

async fn test_workload_scaling(
    ctx: CheckContext,
    client: &dyn ResourceClient,
    targets: &[ScalingTarget],
    config: &LifecycleConfig,
) -> Result<CheckOutcome, CheckError> {
    if targets.is_empty() {
        return Ok(CheckOutcome::skipped("no workloads to scale"));
    }

    let mut scaled = 0;
    let mut not_ready = Vec::new();
    let mut not_scalable = Vec::new();
    for target in targets {
        if is_managed(&target.workload.name, &config.managed_workloads) {
            let workload = client
                .get_workload(&target.workload)
                .await
                .map_err(|e| ScalingError::client(&target.workload, e))?;
            if has_scalable_owner(&workload, &config.scalable_owner_kinds) {
                ctx.log(format!("{} is scaled through its owner, skipping", target.workload));
            } else {
                ctx.log(format!("{} is managed but has no scalable owner", target.workload));
                not_scalable.push(target.workload.to_string());
            }
            continue;
        }

        let result = match &target.autoscaler {
            Some(hpa) => {
                scale_autoscaled_workload(client, hpa, &config.scaling, ctx.stop_signal()).await
            }
            None => scale_workload(client, &target.workload, &config.scaling, ctx.stop_signal()).await,
        };

        match result {
            Ok(report) => {
                scaled += 1;
                ctx.log(format!("{} scaled: {}", target.workload, report.summary()));
                if let Some(e) = report.restore_error {
                    ctx.log(format!("{} autoscaler not restored: {}", target.workload, e));
                }
            }
            Err(e) if e.is_assertion_failure() => {
                ctx.log(format!("{} failed to scale: {}", target.workload, e));
                not_ready.push(target.workload.to_string());
            }
            Err(e) => return Err(e.into()),
        }
    }

    let mut failures = Vec::new();
    if !not_ready.is_empty() {
        failures.push(format!("workloads not ready after scaling: {}", not_ready.join(", ")));
    }
    if !not_scalable.is_empty() {
        failures.push(format!(
            "managed workloads without a scalable owner: {}",
            not_scalable.join(", ")
        ));
    }
    if !failures.is_empty() {
        return Ok(CheckOutcome::failed(failures.join("; ")));
    }
    if scaled == 0 {
        return Ok(CheckOutcome::skipped("all workloads are scaled through their owners"));
    }
    Ok(CheckOutcome::passed())
}
