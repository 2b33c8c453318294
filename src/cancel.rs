//! Cooperative cancellation of blocking waits.
//!
//! The controller's blocking start/stop sequences check a shared token at
//! every poll boundary instead of relying on per-thread interrupt flags, so
//! any holder of a clone can abort an in-flight operation from another
//! thread.

use std::{
    sync::{Arc, Condvar, Mutex, PoisonError},
    time::Duration,
};

/// Shared flag that requests cancellation of a blocking operation.
///
/// Clones observe the same flag. Cancellation is sticky: once cancelled, a
/// token stays cancelled so late observers still see the request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Requests cancellation, waking any thread blocked in a timed wait on
    /// this token.
    pub fn cancel(&self) {
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.inner.signal.notify_all();
    }

    /// Returns `true` once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for up to `timeout`, returning early when cancelled.
    ///
    /// Returns `true` when cancellation was observed, `false` when the full
    /// timeout elapsed.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (cancelled, _timed_out) = self
            .inner
            .signal
            .wait_timeout_while(guard, timeout, |flag| !*flag)
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled
    }
}
