//! # etherec-core
//!
//! Core types for the etherec recorder runtime.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Signal handling, sockets and thread spawning live in `etherec-runtime`.
//!
//! ## Modules
//!
//! - `error` - Error kinds surfaced by the runtime core
//! - `label` - Inline fixed-capacity strings for labels and log text
//! - `state` - Worker lifecycle states and the allowed-transition table
//! - `message` - Fixed-layout inbox message record
//! - `event` - Manual-reset waitable event
//! - `inbox` - Bounded per-worker inbox queue
//! - `logq` - Lock-free multi-producer log queue
//! - `fsm` - Framed command protocol state machine

#![allow(dead_code)]

pub mod error;
pub mod event;
pub mod fsm;
pub mod inbox;
pub mod label;
pub mod logq;
pub mod message;
pub mod state;

// Re-exports for convenience
pub use error::{RuntimeError, RuntimeResult};
pub use event::Event;
pub use fsm::{CommandFsm, FrameError, FsmOutput};
pub use inbox::{InboxQueue, INFINITE};
pub use label::FixedStr;
pub use logq::{DirectSink, LogEntry, LogLevel, LogQueue, StderrSink};
pub use message::{Message, MsgType};
pub use state::WorkerState;

pub use constants::CONTENT_MAX;

/// Constants shared by the runtime
pub mod constants {
    /// Maximum bytes in a message content block
    pub const CONTENT_MAX: usize = 2048;

    /// Default inbox capacity (one slot is sacrificed to distinguish full from empty)
    pub const DEFAULT_INBOX_SIZE: usize = 1024;

    /// Log queue slot count (power of two)
    pub const LOG_QUEUE_SIZE: usize = 1024;

    /// Maximum worker label length in bytes (excluding terminator)
    pub const LABEL_MAX: usize = 63;

    /// Maximum log message text length in bytes
    pub const LOG_TEXT_MAX: usize = 1024;

    /// Frame start marker, big-endian on the wire
    pub const START_MARKER: u32 = 0xBAAD_F00D;

    /// Frame end marker, big-endian on the wire
    pub const END_MARKER: u32 = 0xDEAD_BEEF;

    /// Smallest legal framed packet: START + LENGTH + INDEX + END
    pub const MIN_MESSAGE_SIZE: usize = 16;

    /// Default largest legal framed packet
    pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 2016;
}
