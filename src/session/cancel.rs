//! Cancellation signal for one session, plus the registry that lets other
//! requests reach it by session id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};
use uuid::Uuid;

/// Cooperative stop signal observed by the orchestrator.
///
/// Clones share the same signal. Cancelling is idempotent.
#[derive(Debug, Clone, Default)]
pub struct CancellationController {
    token: CancellationToken,
    requested: Arc<AtomicBool>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns `true` only for the call that flipped the signal.
    pub fn cancel(&self) -> bool {
        let first = !self.requested.swap(true, Ordering::SeqCst);
        self.token.cancel();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Guard that cancels the session when dropped, e.g. when the client's
    /// response body goes away.
    pub fn drop_guard(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }

    /// Cancel automatically after `timeout` unless the session ends first.
    pub fn cancel_after(&self, timeout: Duration) {
        let controller = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = controller.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if controller.cancel() {
                        tracing::info!(timeout_secs = timeout.as_secs(), "Session timed out, cancelling");
                    }
                }
            }
        });
    }
}

/// Controllers of in-flight sessions, keyed by session id.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<Uuid, CancellationController>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and track a controller for a new session.
    pub async fn register(&self, id: Uuid) -> CancellationController {
        let controller = CancellationController::new();
        self.sessions.lock().await.insert(id, controller.clone());
        controller
    }

    /// Cancel a tracked session. Returns `false` if the id is unknown.
    pub async fn cancel(&self, id: &Uuid) -> bool {
        match self.sessions.lock().await.get(id) {
            Some(controller) => {
                controller.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, id: &Uuid) {
        self.sessions.lock().await.remove(id);
    }

    /// Number of sessions currently tracked.
    pub async fn active(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
