//! Single-fire completion gate.
//!
//! Several sources race to finish a session: the state machine, the
//! deadline timer and an optional cancellation token. The gate accepts the
//! first result offered and rejects every later one.

use std::sync::OnceLock;

use tokio::sync::Notify;
use tracing::debug;

use blecmd_types::SessionResult;

/// Accepts exactly one [`SessionResult`].
///
/// `try_complete` may be called from any thread. `wait` resolves once a
/// result is set, including when it was set before `wait` was called.
#[derive(Debug, Default)]
pub struct CompletionGate {
    result: OnceLock<SessionResult>,
    notify: Notify,
}

impl CompletionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a result. Returns `true` if this call won the gate.
    pub fn try_complete(&self, result: SessionResult) -> bool {
        match self.result.set(result) {
            Ok(()) => {
                self.notify.notify_waiters();
                true
            }
            Err(rejected) => {
                debug!(
                    rejected = %rejected,
                    winner = ?self.result.get(),
                    "Completion gate already resolved, dropping late result"
                );
                false
            }
        }
    }

    /// The winning result, if any.
    pub fn result(&self) -> Option<&SessionResult> {
        self.result.get()
    }

    pub fn is_resolved(&self) -> bool {
        self.result.get().is_some()
    }

    /// Wait for the gate to resolve and return the winning result.
    pub async fn wait(&self) -> SessionResult {
        loop {
            // Register before checking so a concurrent notify is not lost.
            let notified = self.notify.notified();
            if let Some(result) = self.result.get() {
                return result.clone();
            }
            notified.await;
        }
    }
}
