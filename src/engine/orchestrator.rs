//! Check run orchestration.
//!
//! Runs every registered group in sorted name order under a global deadline
//! and external interrupts.
//!
//! # Graceful Degradation
//!
//! - Deadline reached: the in-flight group is told to stop, its started check
//!   finishes, every remaining check becomes `Aborted`
//! - Interrupt (SIGINT/SIGTERM or [`Interrupter`]): same as the deadline
//! - Check errors or panics: the check is `Errored`, the run continues, the
//!   errors are reported together at the end
//! - Missing catalog entry: the run is refused before any check runs
//!
//! Whatever happens, every check of every group ends in a terminal state and
//! is recorded exactly once.

use crate::catalog::Catalog;
use crate::engine::check::StructuralError;
use crate::engine::filter::LabelsExpr;
use crate::engine::registry::ChecksDb;
use crate::engine::result::ResultsStore;
use crate::engine::stop::stop_channel;
use crate::EngineError;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;

/// Why a run was cut short
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AbortReason {
    Timeout,
    Interrupted,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Timeout => f.write_str("global time-out"),
            AbortReason::Interrupted => f.write_str("SIGINT/SIGTERM"),
        }
    }
}

/// Run-scoped abort; once raised it stays raised with its first reason.
#[derive(Debug, Default)]
struct AbortFlag(Option<AbortReason>);

impl AbortFlag {
    fn raise(&mut self, reason: AbortReason) {
        if self.0.is_none() {
            self.0 = Some(reason);
        }
    }

    fn get(&self) -> Option<AbortReason> {
        self.0
    }
}

/// Outcome of a run without structural errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub aborted: Option<AbortReason>,
}

/// Raises an interrupt on the run in flight, as SIGINT/SIGTERM would.
#[derive(Debug, Clone)]
pub struct Interrupter {
    tx: Arc<watch::Sender<u64>>,
}

impl Interrupter {
    pub fn interrupt(&self) {
        self.tx.send_modify(|generation| *generation += 1);
    }
}

// Stand-in deadline for timeouts too large to represent
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

enum Race {
    Finished(Result<Vec<StructuralError>, JoinError>),
    Aborted(AbortReason),
}

/// Owns the registry, the catalog and the results of the runs.
#[derive(Debug)]
pub struct RunContext {
    db: Mutex<ChecksDb>,
    results: ResultsStore,
    catalog: Catalog,
    interrupts: Arc<watch::Sender<u64>>,
}

impl RunContext {
    pub fn new(db: ChecksDb, catalog: Catalog) -> Self {
        let (tx, _rx) = watch::channel(0u64);
        RunContext {
            db: Mutex::new(db),
            results: ResultsStore::new(),
            catalog,
            interrupts: Arc::new(tx),
        }
    }

    pub fn results(&self) -> &ResultsStore {
        &self.results
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Registry access between runs; waits for a run in flight.
    pub async fn registry(&self) -> tokio::sync::MutexGuard<'_, ChecksDb> {
        self.db.lock().await
    }

    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            tx: Arc::clone(&self.interrupts),
        }
    }

    /// Run every check selected by `labels_expr`, giving up after `timeout`.
    ///
    /// Runs are serialized: a second caller waits for the first run to end.
    pub async fn run_checks(
        &self,
        labels_expr: &str,
        timeout: Duration,
    ) -> Result<RunOutcome, EngineError> {
        let db = self.db.lock().await;
        let filter = LabelsExpr::parse(labels_expr)?;

        for check_id in db.check_ids().await {
            if !self.catalog.contains(&check_id) {
                return Err(EngineError::MissingCatalogEntry { check_id });
            }
        }
        self.results.reset();
        for (_, group) in db.groups() {
            group.lock().await.reset();
        }

        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE);
        let mut interrupts = self.interrupts.subscribe();
        let mut abort = AbortFlag::default();
        let mut errors: Vec<StructuralError> = Vec::new();

        tracing::info!(labels = %filter, timeout = ?timeout, "Starting check run");

        for (name, group) in db.groups() {
            if abort.get().is_none() {
                if interrupts.has_changed().unwrap_or(false) {
                    abort.raise(AbortReason::Interrupted);
                } else if Instant::now() >= deadline {
                    abort.raise(AbortReason::Timeout);
                }
            }

            if let Some(reason) = abort.get() {
                tracing::warn!(group = %name, "Run aborted ({}), skipping group", reason);
                let mut group = group.lock().await;
                group.on_abort(&filter, &reason.to_string());
                errors.extend(
                    group
                        .record_results(&self.results, &self.catalog)
                        .into_iter()
                        .map(StructuralError::from),
                );
                continue;
            }

            let (stop_handle, stop) = stop_channel();
            let mut task: JoinHandle<Vec<StructuralError>> = tokio::spawn({
                let group = Arc::clone(group);
                let filter = filter.clone();
                async move {
                    let mut group = group.lock().await;
                    let errors = group.run_checks(&filter, stop).await;
                    errors
                }
            });

            let race = tokio::select! {
                biased;
                joined = &mut task => Race::Finished(joined),
                _ = tokio::time::sleep_until(deadline) => Race::Aborted(AbortReason::Timeout),
                Ok(()) = interrupts.changed() => Race::Aborted(AbortReason::Interrupted),
            };

            let joined = match race {
                Race::Finished(joined) => joined,
                Race::Aborted(reason) => {
                    tracing::warn!(group = %name, "Run aborted ({}), stopping group", reason);
                    stop_handle.stop();
                    abort.raise(reason);
                    task.await
                }
            };

            let mut group = group.lock().await;
            match joined {
                Ok(group_errors) => errors.extend(group_errors),
                Err(e) => {
                    let message = format!("group {} task failed: {}", name, e);
                    tracing::error!("{}", message);
                    group.on_abort(&filter, &message);
                    errors.push(StructuralError {
                        check_id: String::new(),
                        message,
                    });
                }
            }
            if let Some(reason) = abort.get() {
                group.on_abort(&filter, &reason.to_string());
            }
            errors.extend(
                group
                    .record_results(&self.results, &self.catalog)
                    .into_iter()
                    .map(StructuralError::from),
            );
        }

        let aborted = abort.get();
        tracing::info!(
            recorded = self.results.total(),
            aborted = ?aborted,
            "Check run finished"
        );

        if !errors.is_empty() {
            for e in &errors {
                tracing::error!("{}", e);
            }
            return Err(EngineError::StructuralErrors {
                count: errors.len(),
                aborted,
            });
        }

        Ok(RunOutcome { aborted })
    }
}

/// Forward SIGINT/SIGTERM to `interrupter` until the returned task is
/// aborted.
pub fn spawn_signal_listener(interrupter: Interrupter) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = wait_for_shutdown_signal().await {
                tracing::error!("Cannot listen for OS signals: {}", e);
                return;
            }
            tracing::warn!("SIGINT/SIGTERM received");
            interrupter.interrupt();
        }
    })
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
