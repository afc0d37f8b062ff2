//! The runtime value
//!
//! Registry, shutdown coordinator, log queue and the logger readiness
//! barrier, owned by one explicitly constructed value. `main` builds it
//! and hands an `Arc<Runtime>` to every worker - there is no hidden
//! global instance to reach for.

use crate::registry::Registry;
use crate::shutdown::Shutdown;
use etherec_core::error::RuntimeResult;
use etherec_core::event::Event;
use etherec_core::logq::{LogLevel, LogQueue};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Process runtime: the single instance every worker shares
pub struct Runtime {
    registry: Registry,
    shutdown: Arc<Shutdown>,
    log: Arc<LogQueue>,
    /// Set by the Logger worker once its loop is servicing the queue
    logger_ready: Event,
    /// Minimum level that reaches the log queue
    log_level: Arc<AtomicU8>,
}

impl Runtime {
    /// Construct with the default log queue draining to stderr
    pub fn new() -> Arc<Self> {
        Self::with_log_queue(Arc::new(LogQueue::new()))
    }

    /// Construct around an explicit log queue (tests inject a capturing sink)
    pub fn with_log_queue(log: Arc<LogQueue>) -> Arc<Self> {
        let runtime = Arc::new(Self {
            registry: Registry::new(),
            shutdown: Shutdown::new(),
            log,
            logger_ready: Event::new(),
            log_level: Arc::new(AtomicU8::new(LogLevel::Info as u8)),
        });
        runtime
            .registry
            .init()
            .expect("fresh registry mutex cannot be poisoned");
        runtime
    }

    /// Wire SIGINT/SIGTERM to `shutdown().signal()`
    pub fn install_signal_handlers(&self) -> RuntimeResult<()> {
        self.shutdown.install()
    }

    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[inline]
    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    #[inline]
    pub fn log_queue(&self) -> Arc<LogQueue> {
        Arc::clone(&self.log)
    }

    #[inline]
    pub fn logger_ready(&self) -> &Event {
        &self.logger_ready
    }

    /// Shared handle for per-thread level filtering
    #[inline]
    pub fn level_handle(&self) -> Arc<AtomicU8> {
        Arc::clone(&self.log_level)
    }

    /// Current minimum level
    pub fn log_level(&self) -> LogLevel {
        match self.log_level.load(Ordering::Relaxed) {
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Change the minimum level (the `log_level` command verb lands here)
    pub fn set_log_level(&self, level: LogLevel) {
        self.log_level.store(level as u8, Ordering::Relaxed);
    }

    /// Tear down the registry and the coordinator
    pub fn cleanup(&self) -> RuntimeResult<()> {
        self.registry.cleanup()?;
        self.shutdown.cleanup()
    }
}
