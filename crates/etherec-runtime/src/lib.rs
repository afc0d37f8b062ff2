//! # etherec-runtime
//!
//! Runtime for the etherec recorder: thread registry, worker lifecycle,
//! shutdown coordination, the logger drain worker, configuration and the
//! network workers. Platform-agnostic types live in `etherec-core`.
//!
//! ## Modules
//!
//! - `runtime` - the explicitly constructed `Runtime` value
//! - `registry` - named worker directory with states and inboxes
//! - `worker` - descriptors, hooks, spawn sequence, message pump
//! - `shutdown` - cooperative cancellation + OS signal handlers
//! - `logctx` - thread-local logging context and `rec_*` macros
//! - `logger` - the Logger drain worker
//! - `config` - INI-style configuration loader
//! - `command` - framed command protocol worker
//! - `file_reader` - file-to-inbox streaming worker
//! - `net` - relay listener worker and socket wait helpers

#![allow(dead_code)]

pub mod command;
pub mod config;
pub mod file_reader;
pub mod logctx;
pub mod logger;
pub mod net;
pub mod registry;
pub mod runtime;
pub mod shutdown;
pub mod worker;

// Re-exports for convenience
pub use config::Config;
pub use registry::Registry;
pub use runtime::Runtime;
pub use shutdown::Shutdown;
pub use worker::{
    noop_hook, spawn_worker, start_workers, HookFn, MainFn, MsgProcessor, WorkerContext,
    WorkerDescriptor, WorkerExit, WorkerHooks,
};

// The log macros name these through `$crate`
pub use etherec_core::logq::LogLevel;
