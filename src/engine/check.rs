//! A single check and its lifecycle.
//!
//! # Graceful Degradation
//!
//! A check body never takes the run down with it:
//! - Body returns an error: check becomes `Errored`, a structural error is reported
//! - Body panics: caught via `FutureExt::catch_unwind`, check becomes `Errored`
//! - Body observes the stop signal: check becomes `Aborted`, not an error

use crate::engine::stop::StopSignal;
use crate::scaling::ScalingError;
use crate::{CheckState, EngineError};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by a check body
pub type CheckFuture = Pin<Box<dyn Future<Output = Result<CheckOutcome, CheckError>> + Send>>;

type CheckBody = Arc<dyn Fn(CheckContext) -> CheckFuture + Send + Sync>;

/// What a check concluded after running to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed(String),
    Skipped(String),
}

/// Result of a check body that ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub verdict: Verdict,
    pub output: Option<String>,
}

impl CheckOutcome {
    pub fn passed() -> Self {
        CheckOutcome {
            verdict: Verdict::Passed,
            output: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        CheckOutcome {
            verdict: Verdict::Failed(reason.into()),
            output: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        CheckOutcome {
            verdict: Verdict::Skipped(reason.into()),
            output: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }
}

/// Errors a check body can return.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    /// The body observed the stop signal and gave up
    #[error("aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Scaling(#[from] ScalingError),

    /// The check's own logic could not execute
    #[error("{0}")]
    Execution(String),
}

impl CheckError {
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            CheckError::Aborted(_) | CheckError::Scaling(ScalingError::Aborted)
        )
    }
}

/// A check or group whose logic failed to execute.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("check {check_id}: {message}")]
pub struct StructuralError {
    pub check_id: String,
    pub message: String,
}

impl From<EngineError> for StructuralError {
    fn from(err: EngineError) -> Self {
        let check_id = match &err {
            EngineError::InvalidTransition { check_id, .. }
            | EngineError::DuplicateResult { check_id }
            | EngineError::MissingCatalogEntry { check_id } => check_id.clone(),
            _ => String::new(),
        };
        StructuralError {
            check_id,
            message: err.to_string(),
        }
    }
}

/// Handed to a check body for the duration of one execution.
#[derive(Debug, Clone)]
pub struct CheckContext {
    check_id: Arc<str>,
    stop: StopSignal,
    output: Arc<Mutex<String>>,
}

impl CheckContext {
    pub fn new(check_id: &str, stop: StopSignal) -> Self {
        CheckContext {
            check_id: Arc::from(check_id),
            stop,
            output: Arc::new(Mutex::new(String::new())),
        }
    }

    pub fn check_id(&self) -> &str {
        &self.check_id
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Append a line to the check's captured output.
    pub fn log(&self, line: impl AsRef<str>) {
        let line = line.as_ref();
        tracing::debug!(check = %self.check_id, "{}", line);
        let mut output = self.output.lock();
        output.push_str(line);
        output.push('\n');
    }

    pub fn captured_output(&self) -> String {
        self.output.lock().clone()
    }
}

/// A registered verification unit
pub struct Check {
    id: String,
    name: String,
    labels: Vec<String>,
    state: CheckState,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    failure_reason: String,
    captured_output: String,
    body: CheckBody,
}

impl Check {
    pub fn new<F, Fut>(id: impl Into<String>, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(CheckContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CheckOutcome, CheckError>> + Send + 'static,
    {
        Check {
            id: id.into(),
            name: name.into(),
            labels: Vec::new(),
            state: CheckState::Pending,
            start_time: None,
            end_time: None,
            failure_reason: String::new(),
            captured_output: String::new(),
            body: Arc::new(move |ctx| Box::pin(body(ctx))),
        }
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels.extend(labels.into_iter().map(Into::into));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn state(&self) -> CheckState {
        self.state
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn failure_reason(&self) -> &str {
        &self.failure_reason
    }

    pub fn captured_output(&self) -> &str {
        &self.captured_output
    }

    /// Wall time between start and end, zero until terminal.
    pub fn duration_ms(&self) -> u64 {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
            _ => 0,
        }
    }

    /// Apply a lifecycle transition, stamping times.
    pub fn transition(&mut self, next: CheckState) -> Result<(), EngineError> {
        if !self.state.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                check_id: self.id.clone(),
                from: self.state,
                to: next,
            });
        }

        let now = Utc::now();
        if next == CheckState::Running {
            self.start_time = Some(now);
        }
        if next.is_terminal() {
            self.end_time = Some(now);
            // Never-started checks report a zero duration
            if self.start_time.is_none() {
                self.start_time = Some(now);
            }
        }
        self.state = next;
        Ok(())
    }

    /// Move to a terminal state with a reason.
    pub fn finish(&mut self, state: CheckState, reason: impl Into<String>) -> Result<(), EngineError> {
        self.transition(state)?;
        self.failure_reason = reason.into();
        Ok(())
    }

    /// Forget the previous run: back to `Pending` with no times, reason or
    /// output.
    pub fn reset(&mut self) {
        self.state = CheckState::Pending;
        self.start_time = None;
        self.end_time = None;
        self.failure_reason.clear();
        self.captured_output.clear();
    }

    /// Run the body once. Returns a structural error when the check ends
    /// `Errored`.
    pub async fn execute(&mut self, stop: StopSignal) -> Result<(), StructuralError> {
        self.transition(CheckState::Running)?;
        tracing::info!(check = %self.id, "Running check");

        let ctx = CheckContext::new(&self.id, stop);
        let body = Arc::clone(&self.body);
        let body_ctx = ctx.clone();
        let result = AssertUnwindSafe(async move { body(body_ctx).await })
            .catch_unwind()
            .await;

        self.captured_output = ctx.captured_output();
        let (state, reason) = match result {
            Ok(Ok(outcome)) => {
                if let Some(output) = outcome.output {
                    self.captured_output.push_str(&output);
                }
                match outcome.verdict {
                    Verdict::Passed => (CheckState::Passed, String::new()),
                    Verdict::Failed(reason) => (CheckState::Failed, reason),
                    Verdict::Skipped(reason) => (CheckState::Skipped, reason),
                }
            }
            Ok(Err(err)) if err.is_abort() => (CheckState::Aborted, err.to_string()),
            Ok(Err(err)) => (CheckState::Errored, err.to_string()),
            Err(payload) => (
                CheckState::Errored,
                format!("check panicked: {}", panic_payload_to_string(payload.as_ref())),
            ),
        };

        self.finish(state, reason)?;
        tracing::info!(
            check = %self.id,
            state = %self.state,
            duration_ms = self.duration_ms(),
            "Check finished"
        );

        if self.state == CheckState::Errored {
            return Err(StructuralError {
                check_id: self.id.clone(),
                message: self.failure_reason.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("labels", &self.labels)
            .field("state", &self.state)
            .field("failure_reason", &self.failure_reason)
            .finish_non_exhaustive()
    }
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
