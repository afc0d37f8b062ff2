//! Process-wide shutdown coordinator
//!
//! One flag, one waitable event. Workers poll `is_signalled()` at least
//! once per outer loop iteration and use `wait()` with bounded timeouts
//! when otherwise idle. Once signalled the coordinator stays signalled
//! until process exit.
//!
//! OS interrupt/termination handlers only store the atomic flag - a signal
//! handler may not touch a mutex or condvar - so `wait()` rechecks the
//! flag on bounded condvar slices and observes handler-initiated shutdown
//! within one slice.

use etherec_core::error::{RuntimeError, RuntimeResult};
use etherec_core::event::Event;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Flag/wait slice; caps how stale a handler-set flag can go unnoticed
const WAIT_SLICE_MS: u64 = 50;

/// Target of the installed OS handlers
static INSTALLED: OnceLock<Arc<Shutdown>> = OnceLock::new();

/// Cooperative cancellation signal shared by every worker
pub struct Shutdown {
    flag: AtomicBool,
    event: Event,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            flag: AtomicBool::new(false),
            event: Event::new(),
        })
    }

    /// Register OS interrupt/termination handlers targeting this instance
    ///
    /// Fails with `AlreadyInstalled` on a second call (from any instance)
    /// and `SystemFailure` if the OS refuses a handler.
    pub fn install(self: &Arc<Self>) -> RuntimeResult<()> {
        INSTALLED
            .set(Arc::clone(self))
            .map_err(|_| RuntimeError::AlreadyInstalled)?;
        install_os_handlers()
    }

    /// Set the flag and wake all waiters (idempotent)
    pub fn signal(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.event.set();
    }

    /// Whether shutdown has fired
    #[inline]
    pub fn is_signalled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Block up to `timeout_ms`; returns whether shutdown fired
    ///
    /// `u64::MAX` waits until shutdown.
    pub fn wait(&self, timeout_ms: u64) -> bool {
        let deadline = if timeout_ms == u64::MAX {
            None
        } else {
            Some(Instant::now() + Duration::from_millis(timeout_ms))
        };

        loop {
            if self.is_signalled() {
                return true;
            }
            let slice = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return self.is_signalled();
                    }
                    (d - now).min(Duration::from_millis(WAIT_SLICE_MS))
                }
                None => Duration::from_millis(WAIT_SLICE_MS),
            };
            if self.event.wait(Some(slice)) {
                return true;
            }
        }
    }

    /// Release coordinator resources
    ///
    /// The event and flag are freed on drop; this exists so teardown has an
    /// explicit, checkable step.
    pub fn cleanup(&self) -> RuntimeResult<()> {
        Ok(())
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

        extern "C" fn on_terminate(_sig: libc::c_int) {
            // Async-signal-safe: flag store only; waiters poll on bounded slices
            if let Some(target) = INSTALLED.get() {
                target.flag.store(true, Ordering::SeqCst);
            }
        }

        fn install_os_handlers() -> RuntimeResult<()> {
            let action = SigAction::new(
                SigHandler::Handler(on_terminate),
                SaFlags::empty(),
                SigSet::empty(),
            );
            for sig in [Signal::SIGINT, Signal::SIGTERM] {
                unsafe { signal::sigaction(sig, &action) }
                    .map_err(|_| RuntimeError::SystemFailure("sigaction failed"))?;
            }
            Ok(())
        }
    } else {
        fn install_os_handlers() -> RuntimeResult<()> {
            // No handler support; shutdown still works via signal()
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_signal_is_monotonic_and_idempotent() {
        let sd = Shutdown::new();
        assert!(!sd.is_signalled());
        sd.signal();
        assert!(sd.is_signalled());
        sd.signal();
        assert!(sd.is_signalled());
        assert!(sd.cleanup().is_ok());
    }

    #[test]
    fn test_wait_times_out_unsignalled() {
        let sd = Shutdown::new();
        let start = Instant::now();
        assert!(!sd.wait(40));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_wait_observes_signal_from_other_thread() {
        let sd = Shutdown::new();
        let sd2 = Arc::clone(&sd);
        let signaller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            sd2.signal();
        });
        assert!(sd.wait(2000));
        signaller.join().unwrap();
    }

    #[test]
    fn test_wait_observes_bare_flag_store() {
        // A signal handler can only store the flag; wait must still notice
        let sd = Shutdown::new();
        let sd2 = Arc::clone(&sd);
        let handler = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            sd2.flag.store(true, Ordering::SeqCst);
        });
        assert!(sd.wait(2000));
        handler.join().unwrap();
    }

    #[test]
    fn test_install_twice_fails() {
        let sd = Shutdown::new();
        match sd.install() {
            Ok(()) => {
                // First install in this process: second must be refused
                assert_eq!(sd.install(), Err(RuntimeError::AlreadyInstalled));
            }
            Err(RuntimeError::AlreadyInstalled) => {
                // Another test got there first; same contract observed
            }
            Err(e) => panic!("unexpected install error: {e}"),
        }
    }
}
