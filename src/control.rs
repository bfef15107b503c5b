//! Worker control primitives: cooperative cancellation and the
//! halt/continue gate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// How long a halted worker waits for `continue` before giving up. A later
/// `continue` simply spawns a fresh worker.
pub const CONTINUE_WAIT_CEILING: Duration = Duration::from_secs(300);

/// Shared cancellation flag for one worker run. The worker observes it at
/// the defined suspension points: before each phase boundary, before each
/// task, and between streamed fragments.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// True when both tokens share the same underlying flag.
    pub fn same(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Condition-variable replacement for the continue-button poll loop.
///
/// Semantics: either the flag turns true and [`ContinueGate::wait`] returns
/// `true`, or the ceiling elapses and it returns `false`. A signal that
/// lands exactly at the deadline is still honored.
#[derive(Debug, Default)]
pub struct ContinueGate {
    requested: AtomicBool,
    notify:    Notify,
}

impl ContinueGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that the halted worker resume.
    pub fn signal(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Waits up to `ceiling` for a resume request, consuming it.
    pub async fn wait(&self, ceiling: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + ceiling;
        loop {
            // Register interest before checking the flag, so a signal landing
            // in between still wakes the wait.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.requested.swap(false, Ordering::SeqCst) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // Deadline hit; pick up a signal that raced the timeout.
                return self.requested.swap(false, Ordering::SeqCst);
            }
        }
    }
}
