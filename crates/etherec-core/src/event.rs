//! Manual-reset waitable event
//!
//! A portable rendering of a manual-reset event: once set, every waiter
//! (current and future) passes until `reset` is called. Completion events
//! and the shutdown event are set exactly once and never reset.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Manual-reset event backed by a mutex + condvar pair
pub struct Event {
    state: Mutex<bool>,
    condvar: Condvar,
}

impl Event {
    /// Create a new event in the unset state
    pub fn new() -> Self {
        Self {
            state: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Set the event and wake all waiters (idempotent)
    pub fn set(&self) {
        let mut signalled = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *signalled = true;
        self.condvar.notify_all();
    }

    /// Clear the event so future waiters block again
    pub fn reset(&self) {
        let mut signalled = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *signalled = false;
    }

    /// Check the event without blocking
    pub fn is_set(&self) -> bool {
        match self.state.lock() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Wait until set or `timeout` elapses; returns whether the event is set
    ///
    /// A `None` timeout waits indefinitely. Spurious wakeups are absorbed by
    /// rechecking the flag.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        // An unrepresentable deadline is the same as no deadline
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut signalled = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        while !*signalled {
            match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return false;
                    }
                    let (g, _) = match self.condvar.wait_timeout(signalled, d - now) {
                        Ok(r) => r,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    signalled = g;
                }
                None => {
                    signalled = match self.condvar.wait(signalled) {
                        Ok(g) => g,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                }
            }
        }
        true
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}
