//! Results store.
//!
//! Holds one [`RecordedResult`] per check per run. Written by the
//! orchestrator while it holds the run lock; readable by collaborators at
//! any time.

use crate::catalog::CatalogEntry;
use crate::engine::check::Check;
use crate::{CheckState, EngineError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Result summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultSummary {
    pub passed: u32,
    pub failed: u32,
    pub errored: u32,
    pub skipped: u32,
    pub aborted: u32,
    pub total: u32,
    pub total_duration_ms: u64,
}

impl ResultSummary {
    /// Whether any check failed or errored
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.errored > 0
    }
}

/// Terminal outcome of one check, with its catalog metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedResult {
    pub check_id: String,
    pub group: String,
    pub name: String,
    pub state: CheckState,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub failure_reason: String,
    pub captured_output: String,
    pub catalog: CatalogEntry,
}

impl RecordedResult {
    pub fn from_check(group: &str, check: &Check, catalog: CatalogEntry) -> Self {
        RecordedResult {
            check_id: check.id().to_string(),
            group: group.to_string(),
            name: check.name().to_string(),
            state: check.state(),
            start_time: check.start_time(),
            end_time: check.end_time(),
            duration_ms: check.duration_ms(),
            failure_reason: check.failure_reason().to_string(),
            captured_output: check.captured_output().to_string(),
            catalog,
        }
    }
}

/// Per-run results keyed by check ID
#[derive(Debug, Default)]
pub struct ResultsStore {
    results: RwLock<BTreeMap<String, RecordedResult>>,
}

impl ResultsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result. A second result for the same check in the same run
    /// is rejected and the first one is kept.
    pub fn record(&self, result: RecordedResult) -> Result<(), EngineError> {
        let mut results = self.results.write();
        if results.contains_key(&result.check_id) {
            return Err(EngineError::DuplicateResult {
                check_id: result.check_id,
            });
        }
        tracing::info!(
            check = %result.check_id,
            group = %result.group,
            state = %result.state,
            "Recorded check result"
        );
        results.insert(result.check_id.clone(), result);
        Ok(())
    }

    /// Forget every result, at the start of a run
    pub fn reset(&self) {
        self.results.write().clear();
    }

    pub fn get(&self, check_id: &str) -> Option<RecordedResult> {
        self.results.read().get(check_id).cloned()
    }

    pub fn by_state(&self, state: CheckState) -> Vec<RecordedResult> {
        self.results
            .read()
            .values()
            .filter(|r| r.state == state)
            .cloned()
            .collect()
    }

    pub fn count_by_state(&self, state: CheckState) -> usize {
        self.results
            .read()
            .values()
            .filter(|r| r.state == state)
            .count()
    }

    pub fn total(&self) -> usize {
        self.results.read().len()
    }

    /// Distinct group names with at least one recorded result, sorted
    pub fn group_names(&self) -> Vec<String> {
        self.results
            .read()
            .values()
            .map(|r| r.group.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Copy of every recorded result, keyed by check ID
    pub fn snapshot(&self) -> BTreeMap<String, RecordedResult> {
        self.results.read().clone()
    }

    pub fn summary(&self) -> ResultSummary {
        let mut summary = ResultSummary::default();

        for result in self.results.read().values() {
            summary.total += 1;
            summary.total_duration_ms += result.duration_ms;

            match result.state {
                CheckState::Passed => summary.passed += 1,
                CheckState::Failed => summary.failed += 1,
                CheckState::Errored => summary.errored += 1,
                CheckState::Skipped => summary.skipped += 1,
                CheckState::Aborted => summary.aborted += 1,
                CheckState::Pending | CheckState::Running => {}
            }
        }

        summary
    }
}
