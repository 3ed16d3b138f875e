//! Results store integration tests.
//!
//! Tests what collaborators read back after a run: catalog metadata copied
//! into each result, captured output, summaries, and the JSON shape.

use checksuite::catalog::{Catalog, CatalogEntry};
use checksuite::checks::{builtin_catalog, lifecycle};
use checksuite::engine::check::{Check, CheckOutcome};
use checksuite::engine::registry::ChecksDb;
use checksuite::{CheckState, EngineError, RunContext};
use std::time::Duration;

fn sample_context() -> RunContext {
    let mut db = ChecksDb::new();
    db.register(
        "networking",
        Check::new("networking-icmp", "ICMP connectivity", |ctx| async move {
            ctx.log("pinging 10.0.0.1");
            Ok(CheckOutcome::passed().with_output("3 packets received\n"))
        })
        .with_labels(["common"]),
    )
    .unwrap();
    db.register(
        "networking",
        Check::new("networking-dual-stack", "Dual stack", |_ctx| async {
            Ok(CheckOutcome::skipped("no IPv6 services"))
        })
        .with_labels(["extended"]),
    )
    .unwrap();
    db.register(
        "access-control",
        Check::new("access-control-sys-admin", "SYS_ADMIN", |_ctx| async {
            Ok(CheckOutcome::failed("container app uses SYS_ADMIN"))
        })
        .with_labels(["common"]),
    )
    .unwrap();

    let mut catalog = Catalog::new();
    catalog.insert(
        "networking-icmp",
        CatalogEntry::new("Checks pod connectivity", "Allow ICMP between pods")
            .with_reference("Networking best practices")
            .with_classification("Telco", "Mandatory"),
    );
    catalog.insert(
        "networking-dual-stack",
        CatalogEntry::new("Checks dual stack services", "Use IPv6"),
    );
    catalog.insert(
        "access-control-sys-admin",
        CatalogEntry::new("Checks capabilities", "Drop SYS_ADMIN")
            .with_exception_process("No exceptions"),
    );
    RunContext::new(db, catalog)
}

#[tokio::test]
async fn test_catalog_metadata_copied_into_results() {
    let ctx = sample_context();
    ctx.run_checks("all", Duration::from_secs(60)).await.unwrap();

    let icmp = ctx.results().get("networking-icmp").unwrap();
    assert_eq!(icmp.state, CheckState::Passed);
    assert_eq!(icmp.catalog.description, "Checks pod connectivity");
    assert_eq!(icmp.catalog.best_practice_reference, "Networking best practices");
    assert_eq!(
        icmp.catalog.category_classification.get("Telco").map(String::as_str),
        Some("Mandatory")
    );
    assert_eq!(icmp.captured_output, "pinging 10.0.0.1\n3 packets received\n");

    let sys_admin = ctx.results().get("access-control-sys-admin").unwrap();
    assert_eq!(sys_admin.state, CheckState::Failed);
    assert_eq!(sys_admin.failure_reason, "container app uses SYS_ADMIN");
    assert_eq!(sys_admin.catalog.exception_process, "No exceptions");
    assert!(sys_admin.start_time.is_some());
    assert!(sys_admin.end_time >= sys_admin.start_time);
}

#[tokio::test]
async fn test_filtered_checks_are_recorded_as_skipped() {
    let ctx = sample_context();
    ctx.run_checks("common", Duration::from_secs(60)).await.unwrap();

    let dual_stack = ctx.results().get("networking-dual-stack").unwrap();
    assert_eq!(dual_stack.state, CheckState::Skipped);
    assert_eq!(dual_stack.failure_reason, "not matching labels filter");
    assert_eq!(dual_stack.catalog.remediation, "Use IPv6");
}

#[tokio::test]
async fn test_summary_and_groups() {
    let ctx = sample_context();
    ctx.run_checks("all", Duration::from_secs(60)).await.unwrap();

    let results = ctx.results();
    assert_eq!(results.group_names(), vec!["access-control", "networking"]);

    let summary = results.summary();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.passed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 1);
    assert!(summary.has_failures());

    let snapshot = results.snapshot();
    assert_eq!(
        snapshot.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["access-control-sys-admin", "networking-dual-stack", "networking-icmp"]
    );
    assert_eq!(results.by_state(CheckState::Failed).len(), 1);
}

#[tokio::test]
async fn test_result_json_shape() {
    let ctx = sample_context();
    ctx.run_checks("all", Duration::from_secs(60)).await.unwrap();

    let icmp = ctx.results().get("networking-icmp").unwrap();
    let json = serde_json::to_value(&icmp).unwrap();
    assert_eq!(json["checkId"], "networking-icmp");
    assert_eq!(json["group"], "networking");
    assert_eq!(json["state"], "passed");
    assert_eq!(json["catalog"]["bestPracticeReference"], "Networking best practices");
    assert_eq!(json["catalog"]["categoryClassification"]["Telco"], "Mandatory");
    assert!(json["startTime"].is_string());
}

#[tokio::test]
async fn test_second_run_replaces_results() {
    let ctx = sample_context();
    ctx.run_checks("all", Duration::from_secs(60)).await.unwrap();
    let first = ctx.results().get("networking-icmp").unwrap();
    ctx.run_checks("all", Duration::from_secs(60)).await.unwrap();

    // Every check ran again and was recorded once for the new run
    assert_eq!(ctx.results().total(), 3);
    let second = ctx.results().get("networking-icmp").unwrap();
    assert_eq!(second.state, CheckState::Passed);
    assert_eq!(second.captured_output, "pinging 10.0.0.1\n3 packets received\n");
    assert!(second.start_time >= first.end_time);
}

#[test]
fn test_duplicate_result_is_rejected() {
    let ctx = sample_context();
    let first = checksuite::RecordedResult {
        check_id: "networking-icmp".to_string(),
        group: "networking".to_string(),
        name: "ICMP connectivity".to_string(),
        state: CheckState::Passed,
        start_time: None,
        end_time: None,
        duration_ms: 0,
        failure_reason: String::new(),
        captured_output: String::new(),
        catalog: CatalogEntry::default(),
    };
    let mut second = first.clone();
    second.state = CheckState::Failed;

    ctx.results().record(first).unwrap();
    let err = ctx.results().record(second).unwrap_err();
    assert!(matches!(err, EngineError::DuplicateResult { .. }));
    assert_eq!(
        ctx.results().get("networking-icmp").unwrap().state,
        CheckState::Passed
    );
}

#[test]
fn test_builtin_catalog_loads_from_json() {
    let json = r#"{
        "lifecycle-workload-scaling": {
            "description": "Scales workloads",
            "remediation": "Fix readiness checks",
            "categoryClassification": {"Telco": "Mandatory"}
        }
    }"#;
    let catalog = Catalog::from_json(json).unwrap();
    let entry = catalog.lookup(lifecycle::WORKLOAD_SCALING).unwrap();
    assert_eq!(entry.remediation, "Fix readiness checks");
    assert!(entry.exception_process.is_empty());

    assert!(builtin_catalog().contains(lifecycle::WORKLOAD_SCALING));
    assert!(matches!(
        Catalog::from_json("[1, 2]"),
        Err(EngineError::CatalogParse(_))
    ));
}
