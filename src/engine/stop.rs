//! Cooperative stop notification.
//!
//! A [`StopHandle`] is held by whoever may cancel work (the orchestrator);
//! any number of [`StopSignal`] clones are handed to the work itself. Raising
//! the handle is sticky: once stopped, every signal stays stopped.

use tokio::sync::watch;

/// Create a connected handle/signal pair.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx: Some(rx) })
}

/// Sender side of a stop notification
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    /// Raise the stop. Idempotent.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Another signal connected to this handle
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: Some(self.tx.subscribe()),
        }
    }
}

/// Receiver side of a stop notification
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl StopSignal {
    /// A signal that is never raised. Used by steps that must run to
    /// completion regardless of an abort, bounded only by their own timeout.
    pub fn never() -> Self {
        StopSignal { rx: None }
    }

    /// Non-blocking poll
    pub fn is_stopped(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolve once the stop is raised. Never resolves if the handle was
    /// dropped without stopping.
    pub async fn stopped(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        if rx.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
