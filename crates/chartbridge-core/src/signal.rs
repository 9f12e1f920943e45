#![forbid(unsafe_code)]

//! Latching one-way signals.
//!
//! A [`Latch`] starts unset and, once set, stays set until explicitly
//! cleared. Waiters block on a condition variable rather than polling, which
//! is how the bridge models the `loaded` and `exited` signals of the render
//! host and the stop request of the dispatch loop.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Clonable, thread-safe latch.
#[derive(Clone, Default)]
pub struct Latch {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Latch {
    /// Create an unset latch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the latch and wake every waiter.
    pub fn set(&self) {
        let (lock, cvar) = &*self.inner;
        let mut set = lock.lock().unwrap_or_else(|e| e.into_inner());
        *set = true;
        cvar.notify_all();
    }

    /// Reset to unset. Waiters already woken are unaffected.
    pub fn clear(&self) {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner()) = false;
    }

    /// Whether the latch is set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait until set or until `duration` elapses.
    ///
    /// Returns `true` if set, `false` on timeout. Spurious wakeups are
    /// absorbed.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut set = lock.lock().unwrap_or_else(|e| e.into_inner());
        let deadline = Instant::now() + duration;
        while !*set {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, _) = cvar
                .wait_timeout(set, remaining)
                .unwrap_or_else(|e| e.into_inner());
            set = guard;
        }
        true
    }
}

impl std::fmt::Debug for Latch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Latch").field("set", &self.is_set()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn unset_wait_times_out() {
        let latch = Latch::new();
        assert!(!latch.wait_timeout(Duration::from_millis(10)));
        assert!(!latch.is_set());
    }

    #[test]
    fn set_before_wait_returns_immediately() {
        let latch = Latch::new();
        latch.set();
        assert!(latch.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn set_from_other_thread_wakes_waiter() {
        let latch = Latch::new();
        let remote = latch.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.set();
        });
        assert!(latch.wait_timeout(Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[test]
    fn clear_resets() {
        let latch = Latch::new();
        latch.set();
        latch.clear();
        assert!(!latch.is_set());
    }
}
