//! Thread-local logging context and leveled log macros
//!
//! The runtime installs a context (worker label + log queue handle) on
//! every worker thread it spawns. The `rec_*` macros read it, build a
//! `LogEntry` and push it into the shared queue. With no context installed
//! (early startup, foreign threads, unit tests) the macros fall back to a
//! direct stderr line so nothing is lost.
//!
//! # Usage
//!
//! ```ignore
//! use etherec_runtime::{rec_info, rec_warn};
//!
//! rec_info!("listening on port {}", port);
//! rec_warn!("unknown command: {:?}", verb);
//! ```

use etherec_core::logq::{LogEntry, LogLevel, LogQueue};
use std::cell::RefCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Per-thread logging context installed by the worker spawn path
#[derive(Clone)]
pub struct LogCtx {
    pub label: String,
    pub queue: Arc<LogQueue>,
    pub level: Arc<AtomicU8>,
}

thread_local! {
    static CTX: RefCell<Option<LogCtx>> = const { RefCell::new(None) };
}

/// Install the logging context for this thread (called by the runtime)
pub fn install(ctx: LogCtx) {
    CTX.with(|c| *c.borrow_mut() = Some(ctx));
}

/// Clear the context (called by the runtime on worker exit)
pub fn clear() {
    CTX.with(|c| *c.borrow_mut() = None);
}

/// Label of the current worker, if a context is installed
pub fn current_label() -> Option<String> {
    CTX.with(|c| c.borrow().as_ref().map(|ctx| ctx.label.clone()))
}

/// Check whether `level` passes the current thread's filter
fn level_enabled(ctx: &LogCtx, level: LogLevel) -> bool {
    level as u8 <= ctx.level.load(Ordering::Relaxed)
}

/// Internal: route one formatted record
#[doc(hidden)]
pub fn _log_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    let routed = CTX.with(|c| {
        if let Some(ctx) = c.borrow().as_ref() {
            if level_enabled(ctx, level) {
                let text = args.to_string();
                let entry = LogEntry::new(level, &ctx.label, &text);
                let _ = ctx.queue.push(&entry);
            }
            true
        } else {
            false
        }
    });

    if !routed {
        eprintln!("{} [----] {}", level.name(), args);
    }
}

/// Error level log
#[macro_export]
macro_rules! rec_error {
    ($($arg:tt)*) => {{
        $crate::logctx::_log_impl(
            $crate::LogLevel::Error,
            format_args!($($arg)*)
        );
    }};
}

/// Warning level log
#[macro_export]
macro_rules! rec_warn {
    ($($arg:tt)*) => {{
        $crate::logctx::_log_impl(
            $crate::LogLevel::Warn,
            format_args!($($arg)*)
        );
    }};
}

/// Info level log
#[macro_export]
macro_rules! rec_info {
    ($($arg:tt)*) => {{
        $crate::logctx::_log_impl(
            $crate::LogLevel::Info,
            format_args!($($arg)*)
        );
    }};
}

/// Debug level log
#[macro_export]
macro_rules! rec_debug {
    ($($arg:tt)*) => {{
        $crate::logctx::_log_impl(
            $crate::LogLevel::Debug,
            format_args!($($arg)*)
        );
    }};
}

/// Trace level log
#[macro_export]
macro_rules! rec_trace {
    ($($arg:tt)*) => {{
        $crate::logctx::_log_impl(
            $crate::LogLevel::Trace,
            format_args!($($arg)*)
        );
    }};
}
