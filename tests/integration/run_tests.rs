//! Full run integration tests.
//!
//! Tests for complete check runs: orchestration, the global deadline,
//! interrupts, abort propagation, and exactly-once recording.

use checksuite::catalog::{Catalog, CatalogEntry};
use checksuite::engine::check::{Check, CheckContext, CheckError, CheckOutcome};
use checksuite::engine::registry::ChecksDb;
use checksuite::{run, AbortReason, CheckState, EngineConfig, EngineError, RunContext};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// Helper to create a check that always passes
fn create_passing_check(id: &str) -> Check {
    Check::new(id, format!("Test check {}", id), |_ctx| async {
        Ok(CheckOutcome::passed())
    })
    .with_labels(["common"])
}

// Helper to create a check that flips `ran` when its body executes
fn create_flagged_check(id: &str, ran: Arc<AtomicBool>) -> Check {
    Check::new(id, format!("Test check {}", id), move |_ctx| {
        let ran = Arc::clone(&ran);
        async move {
            ran.store(true, Ordering::SeqCst);
            Ok(CheckOutcome::passed())
        }
    })
    .with_labels(["common"])
}

// Helper to create a check that sleeps, ignoring the stop signal
fn create_sleeping_check(id: &str, duration: Duration) -> Check {
    Check::new(id, format!("Test check {}", id), move |_ctx| async move {
        tokio::time::sleep(duration).await;
        Ok(CheckOutcome::passed())
    })
    .with_labels(["common"])
}

// Helper to create a check that waits until stopped
fn create_waiting_check(id: &str) -> Check {
    Check::new(id, format!("Test check {}", id), |ctx: CheckContext| async move {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(3600)) => Ok(CheckOutcome::passed()),
            _ = ctx.stop_signal().stopped() => Err(CheckError::Aborted("stop requested".to_string())),
        }
    })
    .with_labels(["common"])
}

fn catalog_for(ids: &[&str]) -> Catalog {
    let mut catalog = Catalog::new();
    for id in ids {
        catalog.insert(*id, CatalogEntry::new(format!("Description of {}", id), "Fix it"));
    }
    catalog
}

fn assert_all_terminal(ctx: &RunContext, expected_total: usize) {
    let results = ctx.results();
    assert_eq!(results.total(), expected_total);
    assert_eq!(results.count_by_state(CheckState::Pending), 0);
    assert_eq!(results.count_by_state(CheckState::Running), 0);
}

#[tokio::test]
async fn test_mixed_outcomes_recorded_once() {
    let mut db = ChecksDb::new();
    db.register("access-control", create_passing_check("ac-pass")).unwrap();
    db.register(
        "access-control",
        Check::new("ac-fail", "Fails", |_ctx| async {
            Ok(CheckOutcome::failed("privileged container found"))
        })
        .with_labels(["common"]),
    )
    .unwrap();
    db.register(
        "networking",
        Check::new("net-error", "Errors", |_ctx| async {
            Err(CheckError::Execution("cannot list services".to_string()))
        })
        .with_labels(["common"]),
    )
    .unwrap();
    db.register(
        "networking",
        Check::new("net-panic", "Panics", |ctx| async move {
            if ctx.check_id() == "net-panic" {
                panic!("index out of bounds");
            }
            Ok(CheckOutcome::passed())
        })
        .with_labels(["common"]),
    )
    .unwrap();
    db.register(
        "networking",
        Check::new("net-skip", "Skips itself", |_ctx| async {
            Ok(CheckOutcome::skipped("no dual-stack services"))
        })
        .with_labels(["common"]),
    )
    .unwrap();
    db.register("networking", create_passing_check("net-extended").with_labels(["extended"]))
        .unwrap();

    let ctx = RunContext::new(
        db,
        catalog_for(&["ac-pass", "ac-fail", "net-error", "net-panic", "net-skip", "net-extended"]),
    );
    let err = ctx
        .run_checks("common && !extended", Duration::from_secs(60))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::StructuralErrors { count: 2, aborted: None }));
    assert_eq!(err.to_string(), "2 errors found in checks/groups");
    assert_all_terminal(&ctx, 6);

    let results = ctx.results();
    assert_eq!(results.get("ac-pass").unwrap().state, CheckState::Passed);
    assert_eq!(results.get("ac-fail").unwrap().state, CheckState::Failed);
    assert_eq!(results.get("net-error").unwrap().state, CheckState::Errored);
    assert_eq!(results.get("net-panic").unwrap().state, CheckState::Errored);
    assert_eq!(results.get("net-skip").unwrap().state, CheckState::Skipped);
    assert_eq!(results.get("net-extended").unwrap().state, CheckState::Skipped);
    assert_eq!(
        results.get("net-extended").unwrap().failure_reason,
        "not matching labels filter"
    );
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_aborts_everything() {
    let ran = Arc::new(AtomicBool::new(false));
    let mut db = ChecksDb::new();
    db.register("a", create_flagged_check("a1", Arc::clone(&ran))).unwrap();
    db.register("a", create_flagged_check("a2", Arc::clone(&ran))).unwrap();
    db.register("b", create_flagged_check("b1", Arc::clone(&ran))).unwrap();

    let ctx = RunContext::new(db, catalog_for(&["a1", "a2", "b1"]));
    let outcome = ctx.run_checks("common", Duration::ZERO).await.unwrap();

    assert_eq!(outcome.aborted, Some(AbortReason::Timeout));
    assert!(!ran.load(Ordering::SeqCst));
    assert_all_terminal(&ctx, 3);
    for result in ctx.results().snapshot().values() {
        assert_eq!(result.state, CheckState::Aborted);
        assert_eq!(result.failure_reason, "global time-out");
    }
}

#[tokio::test(start_paused = true)]
async fn test_deadline_waits_for_in_flight_check_only() {
    let later_ran = Arc::new(AtomicBool::new(false));
    let mut db = ChecksDb::new();
    db.register("a", create_sleeping_check("a1", Duration::from_secs(5))).unwrap();
    db.register("a", create_sleeping_check("a2", Duration::from_secs(5))).unwrap();
    db.register("a", create_sleeping_check("a3", Duration::from_secs(5))).unwrap();
    db.register("b", create_flagged_check("b1", Arc::clone(&later_ran))).unwrap();

    let ctx = RunContext::new(db, catalog_for(&["a1", "a2", "a3", "b1"]));
    let timeout = Duration::from_secs(7);
    let start = Instant::now();
    let outcome = ctx.run_checks("common", timeout).await.unwrap();
    let elapsed = start.elapsed();

    // a2 was in flight at the deadline and is allowed to finish
    assert!(elapsed >= timeout);
    assert!(elapsed <= timeout + Duration::from_secs(5));
    assert_eq!(outcome.aborted, Some(AbortReason::Timeout));

    let results = ctx.results();
    assert_eq!(results.get("a1").unwrap().state, CheckState::Passed);
    assert_eq!(results.get("a2").unwrap().state, CheckState::Passed);
    assert_eq!(results.get("a3").unwrap().state, CheckState::Aborted);
    assert_eq!(results.get("b1").unwrap().state, CheckState::Aborted);
    assert!(!later_ran.load(Ordering::SeqCst));
    assert_all_terminal(&ctx, 4);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_stops_cooperative_check() {
    let mut db = ChecksDb::new();
    db.register("a", create_waiting_check("a1")).unwrap();
    db.register("a", create_passing_check("a2")).unwrap();

    let ctx = RunContext::new(db, catalog_for(&["a1", "a2"]));
    let start = Instant::now();
    let outcome = ctx.run_checks("all", Duration::from_secs(30)).await.unwrap();

    assert_eq!(start.elapsed(), Duration::from_secs(30));
    assert_eq!(outcome.aborted, Some(AbortReason::Timeout));
    let a1 = ctx.results().get("a1").unwrap();
    assert_eq!(a1.state, CheckState::Aborted);
    assert!(a1.failure_reason.contains("stop requested"));
    assert_eq!(ctx.results().get("a2").unwrap().failure_reason, "global time-out");
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_aborts_run() {
    let later_ran = Arc::new(AtomicBool::new(false));
    let mut db = ChecksDb::new();
    db.register("a", create_waiting_check("a1")).unwrap();
    db.register("b", create_flagged_check("b1", Arc::clone(&later_ran))).unwrap();
    db.register("c", create_flagged_check("c1", Arc::clone(&later_ran))).unwrap();

    let ctx = RunContext::new(db, catalog_for(&["a1", "b1", "c1"]));
    let interrupter = ctx.interrupter();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        interrupter.interrupt();
    });

    let start = Instant::now();
    let outcome = ctx.run_checks("common", Duration::from_secs(3600)).await.unwrap();

    assert_eq!(start.elapsed(), Duration::from_secs(2));
    assert_eq!(outcome.aborted, Some(AbortReason::Interrupted));
    assert!(!later_ran.load(Ordering::SeqCst));
    assert_all_terminal(&ctx, 3);
    assert_eq!(ctx.results().get("a1").unwrap().state, CheckState::Aborted);
    for id in ["b1", "c1"] {
        let result = ctx.results().get(id).unwrap();
        assert_eq!(result.state, CheckState::Aborted);
        assert_eq!(result.failure_reason, "SIGINT/SIGTERM");
    }
}

#[tokio::test(start_paused = true)]
async fn test_abort_reason_is_sticky() {
    let mut db = ChecksDb::new();
    db.register("a", create_sleeping_check("a1", Duration::from_secs(10))).unwrap();
    db.register("b", create_passing_check("b1")).unwrap();

    let ctx = RunContext::new(db, catalog_for(&["a1", "b1"]));
    let interrupter = ctx.interrupter();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        interrupter.interrupt();
    });

    // The deadline passes while a1 finishes; the first reason wins
    let outcome = ctx.run_checks("all", Duration::from_secs(5)).await.unwrap();
    assert_eq!(outcome.aborted, Some(AbortReason::Interrupted));
    assert_eq!(ctx.results().get("b1").unwrap().failure_reason, "SIGINT/SIGTERM");
}

#[tokio::test]
async fn test_missing_catalog_entry_is_fatal() {
    let ran = Arc::new(AtomicBool::new(false));
    let mut db = ChecksDb::new();
    db.register("a", create_flagged_check("a1", Arc::clone(&ran))).unwrap();
    db.register("b", create_flagged_check("b1", Arc::clone(&ran))).unwrap();

    let ctx = RunContext::new(db, catalog_for(&["a1"]));
    let err = ctx.run_checks("all", Duration::from_secs(60)).await.unwrap_err();

    assert!(matches!(err, EngineError::MissingCatalogEntry { ref check_id } if check_id == "b1"));
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(ctx.results().total(), 0);
}

#[tokio::test]
async fn test_concurrent_runs_are_serialized() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));
    let overlap = Arc::new(AtomicBool::new(false));
    let mut db = ChecksDb::new();
    let check = {
        let in_flight = Arc::clone(&in_flight);
        let runs = Arc::clone(&runs);
        let overlap = Arc::clone(&overlap);
        Check::new("slow", "Slow", move |_ctx| {
            let in_flight = Arc::clone(&in_flight);
            let runs = Arc::clone(&runs);
            let overlap = Arc::clone(&overlap);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                if in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlap.store(true, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(CheckOutcome::passed())
            }
        })
    };
    db.register("a", check).unwrap();

    let ctx = RunContext::new(db, catalog_for(&["slow"]));
    let (first, second) = tokio::join!(
        ctx.run_checks("all", Duration::from_secs(60)),
        ctx.run_checks("all", Duration::from_secs(60)),
    );
    assert!(first.is_ok());
    assert!(second.is_ok());
    // Each run executed the body, one after the other
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(!overlap.load(Ordering::SeqCst));
    assert_eq!(ctx.results().total(), 1);
    assert_eq!(ctx.results().get("slow").unwrap().state, CheckState::Passed);
}

#[tokio::test]
async fn test_later_run_starts_from_pending() {
    let ran = Arc::new(AtomicBool::new(false));
    let mut db = ChecksDb::new();
    db.register("a", create_flagged_check("a1", Arc::clone(&ran))).unwrap();
    let ctx = RunContext::new(db, catalog_for(&["a1"]));

    ctx.run_checks("none", Duration::from_secs(60)).await.unwrap();
    assert!(!ran.load(Ordering::SeqCst));
    let skipped = ctx.results().get("a1").unwrap();
    assert_eq!(skipped.state, CheckState::Skipped);

    ctx.run_checks("all", Duration::from_secs(60)).await.unwrap();
    assert!(ran.load(Ordering::SeqCst));
    let passed = ctx.results().get("a1").unwrap();
    assert_eq!(passed.state, CheckState::Passed);
    assert!(passed.start_time >= skipped.end_time);

    // A zero timeout aborts the check this time instead of replaying Passed
    let outcome = ctx.run_checks("all", Duration::ZERO).await.unwrap();
    assert_eq!(outcome.aborted, Some(AbortReason::Timeout));
    assert_eq!(ctx.results().get("a1").unwrap().state, CheckState::Aborted);
}

#[tokio::test]
async fn test_duplicate_registration_keeps_run_complete() {
    let mut db = ChecksDb::new();
    db.register("a", create_passing_check("dup")).unwrap();
    let err = db.register("a", create_passing_check("dup")).unwrap_err();
    assert!(matches!(err, EngineError::DuplicateCheck { .. }));
    db.register("a", create_passing_check("after")).unwrap();

    let ctx = RunContext::new(db, catalog_for(&["dup", "after"]));
    ctx.run_checks("all", Duration::from_secs(60)).await.unwrap();
    assert_all_terminal(&ctx, 2);
    assert_eq!(ctx.results().get("after").unwrap().state, CheckState::Passed);
}

#[tokio::test]
async fn test_run_entry_point_reports() {
    let mut db = ChecksDb::new();
    db.register("a", create_passing_check("a1")).unwrap();
    db.register(
        "b",
        Check::new("b1", "Errors", |_ctx| async {
            Err(CheckError::Execution("cluster unreachable".to_string()))
        })
        .with_labels(["common"]),
    )
    .unwrap();

    let ctx = RunContext::new(db, catalog_for(&["a1", "b1"]));
    let config = EngineConfig {
        labels_filter: "common".to_string(),
        handle_os_signals: false,
        ..Default::default()
    };
    let report = run(&ctx, &config).await.unwrap();

    assert_eq!(report.structural_errors, 1);
    assert_eq!(report.aborted, None);
    assert_eq!(report.summary.total, 2);
    assert_eq!(report.summary.passed, 1);
    assert_eq!(report.summary.errored, 1);
    assert!(report.end_time >= report.start_time);
}

#[tokio::test]
async fn test_run_with_default_filter_runs_nothing() {
    let ran = Arc::new(AtomicBool::new(false));
    let mut db = ChecksDb::new();
    db.register("a", create_flagged_check("a1", Arc::clone(&ran))).unwrap();

    let ctx = RunContext::new(db, catalog_for(&["a1"]));
    let config = EngineConfig {
        handle_os_signals: false,
        ..Default::default()
    };
    let report = run(&ctx, &config).await.unwrap();

    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(report.summary.skipped, 1);
}
