//! # etherec - recorder thread runtime
//!
//! A thread runtime and message-passing fabric for a long-running recorder
//! process: named workers with lifecycle states, per-worker bounded
//! inboxes, a lock-free log pipeline, cooperative shutdown and a framed
//! TCP command protocol.
//!
//! ## Quick Start
//!
//! ```ignore
//! use etherec::{Runtime, WorkerDescriptor, WorkerExit, spawn_worker};
//! use std::sync::Arc;
//!
//! fn main() {
//!     let runtime = Runtime::new();
//!     runtime.install_signal_handlers().expect("signal handlers");
//!
//!     spawn_worker(&runtime, etherec::logger_descriptor(Default::default()))
//!         .expect("logger");
//!
//!     let main: etherec::MainFn = Arc::new(|ctx| {
//!         while !ctx.is_shutdown() {
//!             ctx.wait_shutdown(100);
//!         }
//!         WorkerExit::Shutdown
//!     });
//!     spawn_worker(&runtime, WorkerDescriptor::new("HEART", main)).expect("worker");
//!
//!     runtime.shutdown().wait(u64::MAX);
//!     runtime.registry().wait_all(5000).expect("workers drained");
//!     runtime.cleanup().expect("clean teardown");
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Workers                              │
//! │   LOGGER   COMMAND   FILE_READER   RELAY   WRITER   ...     │
//! └─────────────────────────────────────────────────────────────┘
//!        │            │                    │
//!        ▼            ▼                    ▼
//! ┌─────────────┐ ┌────────────────┐ ┌──────────────────┐
//! │  Log Queue  │ │ Thread Registry│ │ Shutdown         │
//! │  (MPSC ring)│ │ labels, states │ │ flag + event     │
//! │             │ │ inboxes, waits │ │ SIGINT/SIGTERM   │
//! └─────────────┘ └────────────────┘ └──────────────────┘
//! ```

// Re-export core types
pub use etherec_core::{
    CommandFsm, Event, FixedStr, FrameError, FsmOutput, InboxQueue, LogEntry, LogLevel, LogQueue,
    Message, MsgType, RuntimeError, RuntimeResult, WorkerState, CONTENT_MAX, INFINITE,
};

pub use etherec_core::constants;
pub use etherec_core::fsm::{encode_ack, encode_frame};
pub use etherec_core::logq::{DirectSink, StderrSink};

// Re-export runtime types
pub use etherec_runtime::{
    noop_hook, spawn_worker, start_workers, Config, HookFn, MainFn, MsgProcessor, Registry,
    Runtime, Shutdown, WorkerContext, WorkerDescriptor, WorkerExit, WorkerHooks,
};

pub use etherec_runtime::command::{command_descriptor, dispatch_command, CommandSettings};
pub use etherec_runtime::file_reader::{file_reader_descriptor, FileReaderSettings, ReadMode};
pub use etherec_runtime::logger::{format_line, hex_preview, logger_descriptor, LoggerSettings};
pub use etherec_runtime::net::{relay_descriptor, RelaySettings};

// Re-export the log macros and the thread-local context shim
pub use etherec_runtime::logctx::{self, LogCtx};
pub use etherec_runtime::{rec_debug, rec_error, rec_info, rec_trace, rec_warn};
