//! Retry on optimistic-concurrency conflicts.

use crate::engine::stop::StopSignal;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Backoff between conflict retries
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Retries after the first attempt
    pub retries: u32,
    pub initial: Duration,
    /// Multiplier applied to the delay after each retry
    pub factor: f64,
    /// Random extra delay, as a fraction of the base delay
    pub jitter: f64,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            retries: 4,
            initial: Duration::from_millis(10),
            factor: 1.0,
            jitter: 0.1,
            cap: Duration::from_secs(1),
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.initial.as_secs_f64() * self.factor.max(0.0).powi(retry as i32);
        let base = base.min(self.cap.as_secs_f64());
        let jitter = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(0.0..=self.jitter) * base
        } else {
            0.0
        };
        Duration::from_secs_f64(base + jitter)
    }
}

/// Why a retried operation gave up
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("still conflicting after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error(transparent)]
    Failed(E),

    #[error("retry aborted")]
    Aborted,
}

/// Run `op` until it succeeds, fails with a non-conflict error, runs out of
/// retries, or `stop` is raised.
///
/// `op` must re-read the object it updates on every call so that each attempt
/// applies the change to the latest version.
pub async fn retry_on_conflict<T, E, F, Fut, P>(
    backoff: &Backoff,
    stop: &StopSignal,
    is_conflict: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempts = 0;
    loop {
        if stop.is_stopped() {
            return Err(RetryError::Aborted);
        }
        attempts += 1;

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !is_conflict(&e) => return Err(RetryError::Failed(e)),
            Err(e) => e,
        };
        if attempts > backoff.retries {
            return Err(RetryError::Exhausted {
                attempts,
                last: err,
            });
        }

        let delay = backoff.delay(attempts - 1);
        tracing::debug!(attempts, ?delay, "Update conflict, retrying");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop.stopped() => return Err(RetryError::Aborted),
        }
    }
}
