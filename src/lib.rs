//! checksuite library
//!
//! Check execution engine for verifying a live, mutable cluster.
//!
//! This library provides:
//! - A registry of named check groups populated by check catalogs
//! - An orchestrator that runs every group under a global deadline and
//!   SIGINT/SIGTERM, guaranteeing every check ends in a terminal state
//! - A results store recorded exactly once per check per run, enriched with
//!   catalog metadata
//! - A retry/convergence protocol for checks that scale live workloads and
//!   must leave them as they found them
//!
//! # Example
//!
//! ```no_run
//! use checksuite::catalog::{Catalog, CatalogEntry};
//! use checksuite::engine::check::{Check, CheckOutcome};
//! use checksuite::engine::orchestrator::RunContext;
//! use checksuite::engine::registry::ChecksDb;
//! use checksuite::{run, EngineConfig};
//!
//! # async fn example() -> Result<(), checksuite::EngineError> {
//! let mut db = ChecksDb::new();
//! db.register(
//!     "observability",
//!     Check::new("observability-container-logging", "Container logging", |_ctx| async {
//!         Ok(CheckOutcome::passed())
//!     })
//!     .with_labels(["common"]),
//! )?;
//!
//! let mut catalog = Catalog::new();
//! catalog.insert(
//!     "observability-container-logging",
//!     CatalogEntry::new("Containers log to stdout/stderr", "Log to stdout"),
//! );
//!
//! let ctx = RunContext::new(db, catalog);
//! let config = EngineConfig { labels_filter: "common".to_string(), ..Default::default() };
//! config.init_logging();
//! let report = run(&ctx, &config).await?;
//! println!("Checks passed: {}", report.summary.passed);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod checks;
pub mod engine;
pub mod logging;
pub mod scaling;

use chrono::{DateTime, Utc};
use engine::result::ResultSummary;
use scaling::ScalingConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

// Re-exports for public API
pub use catalog::{Catalog, CatalogEntry};
pub use engine::orchestrator::{AbortReason, Interrupter, RunContext, RunOutcome};
pub use engine::result::{RecordedResult, ResultsStore};

/// Lifecycle state of a check.
///
/// `Pending -> Running -> {Passed, Failed, Errored, Skipped}`, with `Aborted`
/// reachable from `Pending` or `Running`. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckState {
    /// Registered, not dispatched yet
    Pending,
    /// Body currently executing
    Running,
    /// Verification ran and the assertion held
    Passed,
    /// Verification ran and the assertion did not hold
    Failed,
    /// The check's own logic failed to execute
    Errored,
    /// Not run (filtered out, or the check decided it does not apply)
    Skipped,
    /// Stopped by the run's deadline or an interrupt
    Aborted,
}

impl CheckState {
    /// All states, in lifecycle order.
    pub const ALL: [CheckState; 7] = [
        CheckState::Pending,
        CheckState::Running,
        CheckState::Passed,
        CheckState::Failed,
        CheckState::Errored,
        CheckState::Skipped,
        CheckState::Aborted,
    ];

    /// Whether no further transition is allowed out of this state.
    pub fn is_terminal(self) -> bool {
        !matches!(self, CheckState::Pending | CheckState::Running)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: CheckState) -> bool {
        match self {
            CheckState::Pending => matches!(
                next,
                CheckState::Running | CheckState::Skipped | CheckState::Aborted
            ),
            CheckState::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckState::Pending => "pending",
            CheckState::Running => "running",
            CheckState::Passed => "passed",
            CheckState::Failed => "failed",
            CheckState::Errored => "errored",
            CheckState::Skipped => "skipped",
            CheckState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Error types for checksuite operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Labels filter could not be parsed
    #[error("invalid labels expression {expr:?}: {message}")]
    InvalidLabelsExpr { expr: String, message: String },

    /// A registered check has no catalog entry
    #[error("check {check_id} has no corresponding catalog entry")]
    MissingCatalogEntry { check_id: String },

    /// A check with this ID is already registered
    #[error("check {check_id} is already registered in group {group}")]
    DuplicateCheck { check_id: String, group: String },

    /// A result for this check was already recorded in this run
    #[error("result for check {check_id} already recorded in this run")]
    DuplicateResult { check_id: String },

    /// Illegal lifecycle transition
    #[error("check {check_id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        check_id: String,
        from: CheckState,
        to: CheckState,
    },

    /// Group is shared with an in-flight run
    #[error("group {group} is in use by a running check run")]
    RegistryBusy { group: String },

    /// Checks failed to execute
    #[error("{count} errors found in checks/groups")]
    StructuralErrors {
        count: usize,
        aborted: Option<AbortReason>,
    },

    /// Invalid configuration value
    #[error("invalid configuration {key}: {message}")]
    Config { key: String, message: String },

    /// Catalog document could not be parsed
    #[error("failed to parse catalog: {0}")]
    CatalogParse(#[from] serde_json::Error),
}

/// Configuration for a check run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Labels expression selecting the checks to run
    pub labels_filter: String,
    /// Global timeout for the whole run
    pub timeout: Duration,
    /// Directory collaborators write report artifacts into
    pub output_dir: PathBuf,
    /// Default log level when `RUST_LOG` is unset, applied by
    /// [`EngineConfig::init_logging`]. [`run`] never installs a subscriber.
    pub log_level: String,
    /// Abort the run on SIGINT/SIGTERM
    pub handle_os_signals: bool,
    /// Settings for checks that scale workloads
    pub scaling: ScalingConfig,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            labels_filter: engine::filter::NO_LABELS_EXPR.to_string(),
            timeout: DEFAULT_TIMEOUT,
            output_dir: PathBuf::from("."),
            log_level: "info".to_string(),
            handle_os_signals: true,
            scaling: ScalingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Build a configuration from defaults overridden by `CHECKSUITE_*`
    /// environment variables.
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an injectable lookup (for testing)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = EngineConfig::default();

        if let Some(labels) = lookup("CHECKSUITE_LABELS") {
            config.labels_filter = labels;
        }
        if let Some(timeout) = lookup("CHECKSUITE_TIMEOUT") {
            config.timeout = parse_duration(&timeout).map_err(|message| EngineError::Config {
                key: "CHECKSUITE_TIMEOUT".to_string(),
                message,
            })?;
        }
        if let Some(dir) = lookup("CHECKSUITE_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup("CHECKSUITE_LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(flag) = lookup("CHECKSUITE_HANDLE_SIGNALS") {
            config.handle_os_signals = match flag.to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(EngineError::Config {
                        key: "CHECKSUITE_HANDLE_SIGNALS".to_string(),
                        message: format!("expected a boolean, got '{}'", flag),
                    })
                }
            };
        }
        if let Some(timeout) = lookup("CHECKSUITE_SCALING_TIMEOUT") {
            config.scaling.step_timeout =
                parse_duration(&timeout).map_err(|message| EngineError::Config {
                    key: "CHECKSUITE_SCALING_TIMEOUT".to_string(),
                    message,
                })?;
        }

        Ok(config)
    }

    /// Install the global tracing subscriber at `log_level`.
    ///
    /// Returns `false` if a subscriber was already installed.
    pub fn init_logging(&self) -> bool {
        logging::init_tracing(&self.log_level)
    }
}

/// Parse a Go-style duration such as `30s`, `1h30m` or `250ms`.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in duration '{}'", input))?;
        if digits == 0 {
            return Err(format!("invalid duration '{}'", input));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid number in duration '{}'", input))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let overflow = || format!("duration '{}' is too large", input);
        let part = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(overflow)?),
            "h" => Duration::from_secs(value.checked_mul(60 * 60).ok_or_else(overflow)?),
            _ => return Err(format!("unknown unit '{}' in duration '{}'", unit, input)),
        };
        total = total.checked_add(part).ok_or_else(overflow)?;
    }

    Ok(total)
}

/// Outcome of a full run, as handed to report collaborators.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub labels_filter: String,
    pub output_dir: PathBuf,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub summary: ResultSummary,
    pub aborted: Option<AbortReason>,
    /// Number of checks/groups whose logic failed to execute
    pub structural_errors: usize,
}

/// Run every registered check matching `config.labels_filter`.
///
/// This is the main entry point for a run. Structural errors are logged and
/// reported in the returned [`RunReport`]; only fatal conditions (a check
/// without a catalog entry, an unparsable labels filter) are returned as
/// errors. Writing artifacts into `config.output_dir` is left to the caller.
pub async fn run(ctx: &RunContext, config: &EngineConfig) -> Result<RunReport, EngineError> {
    tracing::info!(
        labels = %config.labels_filter,
        timeout = ?config.timeout,
        output_dir = %config.output_dir.display(),
        "Running checks"
    );

    let listener = config
        .handle_os_signals
        .then(|| engine::orchestrator::spawn_signal_listener(ctx.interrupter()));

    let start_time = Utc::now();
    let result = ctx.run_checks(&config.labels_filter, config.timeout).await;
    if let Some(listener) = listener {
        listener.abort();
    }

    let (aborted, structural_errors) = match result {
        Ok(outcome) => (outcome.aborted, 0),
        Err(EngineError::StructuralErrors { count, aborted }) => {
            tracing::error!("{} errors found in checks/groups", count);
            (aborted, count)
        }
        Err(e) => return Err(e),
    };
    let end_time = Utc::now();

    tracing::info!(
        elapsed_ms = (end_time - start_time).num_milliseconds(),
        "Finished running checks"
    );

    Ok(RunReport {
        labels_filter: config.labels_filter.clone(),
        output_dir: config.output_dir.clone(),
        start_time,
        end_time,
        summary: ctx.results().summary(),
        aborted,
        structural_errors,
    })
}
