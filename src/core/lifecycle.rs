//! Run state of the executor, shared with whoever controls the process.
//!
//! The executor publishes its state on a `watch` channel; `main` and the
//! signal listener hold clones of the same [`Lifecycle`] to request a stop and
//! to wait for the executor to reach [`ExecutorState::Stopped`].

use std::fmt;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// Constructed, not yet running.
    Idle,
    /// Components initialized, ticks are being scheduled.
    Running,
    /// Stop decided, cleanup in progress.
    Stopping,
    /// Cleanup done; no component will be called again.
    Stopped,
}

impl ExecutorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorState::Idle => "Idle",
            ExecutorState::Running => "Running",
            ExecutorState::Stopping => "Stopping",
            ExecutorState::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stop requests in, state transitions out.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    cancel: CancellationToken,
    state_tx: watch::Sender<ExecutorState>,
    state_rx: watch::Receiver<ExecutorState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(ExecutorState::Idle);
        Self {
            cancel: CancellationToken::new(),
            state_tx,
            state_rx,
        }
    }

    /// Asks the executor to stop. Safe to call any number of times.
    pub fn request_stop(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Stop requested");
        }
        self.cancel.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once a stop was requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn state(&self) -> ExecutorState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExecutorState> {
        self.state_rx.clone()
    }

    /// Resolves once the executor reached `Stopped`.
    pub async fn wait_stopped(&self) {
        let mut rx = self.state_rx.clone();
        // Our own sender is alive as long as `self`, so the channel never closes here.
        let _ = rx.wait_for(|state| *state == ExecutorState::Stopped).await;
    }

    pub(crate) fn set_state(&self, state: ExecutorState) {
        let old_state = self.state_tx.send_replace(state);
        if old_state != state {
            debug!("Executor state changed: {} -> {}", old_state, state);
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
