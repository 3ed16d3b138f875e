//! Named, ordered sequence of checks.

use crate::catalog::Catalog;
use crate::engine::check::{Check, StructuralError};
use crate::engine::filter::LabelsExpr;
use crate::engine::result::{RecordedResult, ResultsStore};
use crate::engine::stop::StopSignal;
use crate::{CheckState, EngineError};

/// Reason given to checks that never ran because the filter excluded them
pub const SKIPPED_BY_FILTER: &str = "not matching labels filter";

/// Checks sharing a name, executed in insertion order
#[derive(Debug)]
pub struct ChecksGroup {
    name: String,
    checks: Vec<Check>,
}

impl ChecksGroup {
    pub fn new(name: impl Into<String>) -> Self {
        ChecksGroup {
            name: name.into(),
            checks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub(crate) fn add(&mut self, check: Check) {
        self.checks.push(check);
    }

    /// Whether `check` is selected by `filter`. The check ID and the group
    /// name count as labels.
    pub fn matches(&self, check: &Check, filter: &LabelsExpr) -> bool {
        let mut labels: Vec<&str> = check.labels().iter().map(String::as_str).collect();
        labels.push(check.id());
        labels.push(&self.name);
        filter.eval(&labels)
    }

    /// Put every check back to `Pending` for a new run.
    pub fn reset(&mut self) {
        for check in &mut self.checks {
            check.reset();
        }
    }

    /// Run every check in order until done or stopped.
    ///
    /// The stop signal is polled before each check; a started check is left
    /// to finish. Checks not dispatched because of the stop stay `Pending`
    /// for [`ChecksGroup::on_abort`].
    pub async fn run_checks(
        &mut self,
        filter: &LabelsExpr,
        stop: StopSignal,
    ) -> Vec<StructuralError> {
        let mut errors = Vec::new();
        tracing::info!(group = %self.name, checks = self.checks.len(), "Running group");

        for i in 0..self.checks.len() {
            if stop.is_stopped() {
                tracing::warn!(group = %self.name, "Stop requested, not dispatching remaining checks");
                break;
            }

            let selected = self.matches(&self.checks[i], filter);
            let check = &mut self.checks[i];
            if !selected {
                if let Err(e) = check.finish(CheckState::Skipped, SKIPPED_BY_FILTER) {
                    errors.push(e.into());
                }
                continue;
            }

            if let Err(e) = check.execute(stop.clone()).await {
                tracing::error!(group = %self.name, "{}", e);
                errors.push(e);
            }
        }

        errors
    }

    /// Move every non-terminal check to a terminal state without running it.
    ///
    /// Matching checks become `Aborted` with `reason`; non-matching pending
    /// checks become `Skipped`. Calling it twice changes nothing.
    pub fn on_abort(&mut self, filter: &LabelsExpr, reason: &str) {
        for i in 0..self.checks.len() {
            if self.checks[i].state().is_terminal() {
                continue;
            }
            let next = if self.checks[i].state() == CheckState::Pending
                && !self.matches(&self.checks[i], filter)
            {
                (CheckState::Skipped, SKIPPED_BY_FILTER)
            } else {
                (CheckState::Aborted, reason)
            };

            let check = &mut self.checks[i];
            if let Err(e) = check.finish(next.0, next.1) {
                tracing::error!(group = %self.name, "{}", e);
            }
        }
    }

    /// Record every check of the group into `store`, with catalog metadata.
    ///
    /// A check that cannot be recorded does not stop the others from being
    /// recorded; its error is returned.
    pub fn record_results(&self, store: &ResultsStore, catalog: &Catalog) -> Vec<EngineError> {
        let mut errors = Vec::new();
        for check in &self.checks {
            let Some(entry) = catalog.lookup(check.id()).cloned() else {
                errors.push(EngineError::MissingCatalogEntry {
                    check_id: check.id().to_string(),
                });
                continue;
            };
            if let Err(e) = store.record(RecordedResult::from_check(&self.name, check, entry)) {
                errors.push(e);
            }
        }
        errors
    }
}
