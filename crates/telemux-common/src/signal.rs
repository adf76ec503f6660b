//! Named condition flags for cross-worker signaling.
//!
//! Workers wait on flags like "network ready" or "fix acquired" with a
//! timeout instead of polling shared state in a sleep loop. A flag is
//! level-triggered: once raised it stays raised until cleared, and waiters
//! that arrive after the raise return immediately.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A raisable, clearable condition flag that many workers may wait on.
#[derive(Clone)]
pub struct SignalFlag {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    raised: Mutex<bool>,
    condvar: Condvar,
}

impl SignalFlag {
    /// Create a new flag in the lowered state.
    pub fn new() -> Self {
        SignalFlag {
            inner: Arc::new(SignalInner {
                raised: Mutex::new(false),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Raise the flag, waking all current waiters.
    pub fn raise(&self) {
        let mut raised = self.inner.raised.lock();
        *raised = true;
        self.inner.condvar.notify_all();
    }

    /// Lower the flag. Future waiters block again.
    pub fn clear(&self) {
        let mut raised = self.inner.raised.lock();
        *raised = false;
    }

    /// Check the flag without waiting.
    pub fn is_raised(&self) -> bool {
        *self.inner.raised.lock()
    }

    /// Wait until the flag is raised or `timeout` elapses.
    ///
    /// Returns `true` if the flag was raised within the timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut raised = self.inner.raised.lock();
        while !*raised {
            if self.inner.condvar.wait_until(&mut raised, deadline).timed_out() {
                return *raised;
            }
        }
        true
    }
}

impl Default for SignalFlag {
    fn default() -> Self {
        Self::new()
    }
}
