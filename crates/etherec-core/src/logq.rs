//! Lock-free multi-producer log queue
//!
//! Every worker pushes `LogEntry` records into one shared ring; a single
//! Logger worker drains it. Producers reserve a slot by CAS-ing its state
//! from Empty to Reserved before publishing the value as Written, so the
//! consumer can never observe a half-written slot. A global fallback mutex
//! guarantees forward progress under pathological contention: entries that
//! cannot be inserted are emitted directly through the sink with an
//! explicit overflow notice - nothing is silently dropped.
//!
//! Capacity hysteresis: at >= 99% occupancy the queue flips a process-wide
//! "console suspended" flag so the drain elides console writes until
//! occupancy falls back to <= 60%. This keeps console I/O stalls from
//! becoming the bottleneck of the whole process.

use crate::constants::{LABEL_MAX, LOG_QUEUE_SIZE, LOG_TEXT_MAX};
use crate::error::{RuntimeError, RuntimeResult};
use crate::label::FixedStr;
use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Insert attempts before falling back to the global mutex
const MAX_RETRY: u32 = 100;

/// Backoff cap in milliseconds (2^10)
const BACKOFF_CAP_MS: u64 = 1024;

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    /// Column-aligned level name for rendered lines
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN ",
            LogLevel::Info => "INFO ",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    /// Parse a level name as it appears in config and commands
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().trim_end())
    }
}

/// Milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One record in the log pipeline; trivially copyable
#[derive(Clone, Copy, Debug)]
pub struct LogEntry {
    /// Monotonic index assigned by the queue at insertion
    pub index: u64,
    pub level: LogLevel,
    /// Milliseconds since the Unix epoch, stamped at creation
    pub timestamp_ms: u64,
    pub text: FixedStr<LOG_TEXT_MAX>,
    pub label: FixedStr<{ LABEL_MAX + 1 }>,
}

impl LogEntry {
    /// Build an entry stamped with the current wall clock
    pub fn new(level: LogLevel, label: &str, text: &str) -> Self {
        Self {
            index: 0,
            level,
            timestamp_ms: now_ms(),
            text: FixedStr::new(text),
            label: FixedStr::new(label),
        }
    }
}

/// Receiver of bypass-queue emissions (overflow notices, purged entries,
/// suspension notices). The default sink writes to stderr; tests install a
/// capturing sink.
pub trait DirectSink: Send + Sync {
    fn emit(&self, entry: &LogEntry);
}

/// Default direct sink: one rendered line per entry on stderr
pub struct StderrSink;

impl DirectSink for StderrSink {
    fn emit(&self, entry: &LogEntry) {
        eprintln!("{} [{}] {}", entry.level.name(), entry.label, entry.text);
    }
}

// Per-slot states
const SLOT_EMPTY: u8 = 0;
const SLOT_RESERVED: u8 = 1;
const SLOT_WRITTEN: u8 = 2;

struct Slot {
    state: AtomicU8,
    entry: UnsafeCell<LogEntry>,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SLOT_EMPTY),
            entry: UnsafeCell::new(LogEntry::new(LogLevel::Trace, "", "")),
        }
    }
}

/// Lock-free MPSC ring feeding the Logger drain worker
pub struct LogQueue {
    slots: Box<[Slot]>,
    size: usize,
    /// Producer index: next slot to reserve
    head: AtomicUsize,
    /// Consumer index: next slot to drain
    tail: AtomicUsize,
    console_suspended: AtomicBool,
    /// Monotonic index source for inserted and direct entries
    next_index: AtomicU64,
    /// Global logging mutex: overflow purge and the post-retry fallback.
    /// Leaf lock - nothing else is acquired while it is held.
    fallback: Mutex<()>,
    sink: Arc<dyn DirectSink>,
}

// Safety: slot contents are published only through the per-slot state
// atomics (Reserved -> Written before any read, Empty only after copy-out)
unsafe impl Send for LogQueue {}
unsafe impl Sync for LogQueue {}

impl LogQueue {
    /// Create a queue of `LOG_QUEUE_SIZE` slots draining to stderr
    pub fn new() -> Self {
        Self::with_sink(LOG_QUEUE_SIZE, Arc::new(StderrSink))
    }

    /// Create a queue of `size` slots with an explicit direct sink
    pub fn with_sink(size: usize, sink: Arc<dyn DirectSink>) -> Self {
        let size = size.max(4);
        let slots = (0..size).map(|_| Slot::new()).collect::<Vec<_>>().into_boxed_slice();
        Self {
            slots,
            size,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            console_suspended: AtomicBool::new(false),
            next_index: AtomicU64::new(1),
            fallback: Mutex::new(()),
            sink,
        }
    }

    /// Slot count
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Occupied slots at this instant
    pub fn used(&self) -> usize {
        let h = self.head.load(Ordering::Acquire);
        let t = self.tail.load(Ordering::Acquire);
        (h + self.size - t) % self.size
    }

    /// Whether console output is currently suspended for backpressure
    #[inline]
    pub fn is_console_suspended(&self) -> bool {
        self.console_suspended.load(Ordering::Acquire)
    }

    #[inline]
    fn next(&self, idx: usize) -> usize {
        (idx + 1) % self.size
    }

    /// Emit directly through the sink, bypassing the ring
    fn direct(&self, level: LogLevel, text: &str) {
        let mut entry = LogEntry::new(level, "LOGQ", text);
        entry.index = self.next_index.fetch_add(1, Ordering::Relaxed);
        self.sink.emit(&entry);
    }

    /// Sample occupancy and flip the console-suspension flag with hysteresis
    fn sample_backpressure(&self) {
        let used = self.used();
        if used >= self.size * 99 / 100 {
            if self
                .console_suspended
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.direct(
                    LogLevel::Warn,
                    &format!("console suspended: log queue at {}/{}", used, self.size),
                );
            }
        } else if used * 100 <= self.size * 60
            && self
                .console_suspended
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.direct(
                LogLevel::Info,
                &format!("console resumed: log queue at {}/{}", used, self.size),
            );
        }
    }

    /// Insert `entry`, assigning its monotonic index
    ///
    /// Never drops: after `MAX_RETRY` failed reservation attempts the entry
    /// is inserted (or emitted directly) under the global logging mutex.
    pub fn push(&self, entry: &LogEntry) -> RuntimeResult<u64> {
        if entry.label.is_empty() {
            return Err(RuntimeError::InvalidArgument("log entry label is empty"));
        }

        self.sample_backpressure();

        for attempt in 0..MAX_RETRY {
            let h = self.head.load(Ordering::Acquire);
            let t = self.tail.load(Ordering::Acquire);

            if self.next(h) == t {
                self.purge_oldest();
                continue;
            }

            let slot = &self.slots[h];
            if slot
                .state
                .compare_exchange(SLOT_EMPTY, SLOT_RESERVED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                self.backoff(attempt);
                continue;
            }

            if self
                .head
                .compare_exchange(h, self.next(h), Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // Lost the index race; hand the slot back before retrying
                slot.state.store(SLOT_EMPTY, Ordering::Release);
                self.backoff(attempt);
                continue;
            }

            let index = self.next_index.fetch_add(1, Ordering::Relaxed);
            unsafe {
                let dst = &mut *slot.entry.get();
                *dst = *entry;
                dst.index = index;
            }
            slot.state.store(SLOT_WRITTEN, Ordering::Release);
            return Ok(index);
        }

        self.push_fallback(entry)
    }

    /// Post-retry path: insert or emit directly under the global mutex
    fn push_fallback(&self, entry: &LogEntry) -> RuntimeResult<u64> {
        let _guard = self.fallback.lock()?;

        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let mut stamped = *entry;
        stamped.index = index;

        for _ in 0..MAX_RETRY {
            let h = self.head.load(Ordering::Acquire);
            let t = self.tail.load(Ordering::Acquire);
            if self.next(h) == t {
                break;
            }
            let slot = &self.slots[h];
            if slot
                .state
                .compare_exchange(SLOT_EMPTY, SLOT_RESERVED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                core::hint::spin_loop();
                continue;
            }
            if self
                .head
                .compare_exchange(h, self.next(h), Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                slot.state.store(SLOT_EMPTY, Ordering::Release);
                core::hint::spin_loop();
                continue;
            }
            unsafe {
                *slot.entry.get() = stamped;
            }
            slot.state.store(SLOT_WRITTEN, Ordering::Release);
            return Ok(index);
        }

        self.direct(
            LogLevel::Error,
            "log queue contended; emitting entry directly",
        );
        self.sink.emit(&stamped);
        Ok(index)
    }

    /// Overflow path: under the global mutex, emit the oldest tenth of the
    /// queue directly so producers regain space
    fn purge_oldest(&self) {
        let guard = self.fallback.lock();
        let _guard = match guard {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        // Another producer may have purged while we waited for the mutex
        let h = self.head.load(Ordering::Acquire);
        let t = self.tail.load(Ordering::Acquire);
        if self.next(h) != t {
            return;
        }

        let purge = (self.size / 10).max(1);
        self.direct(
            LogLevel::Error,
            &format!("log queue overflow; purging {} oldest entries", purge),
        );

        let mut purged = 0;
        while purged < purge {
            let h = self.head.load(Ordering::Acquire);
            let t = self.tail.load(Ordering::Acquire);
            if h == t {
                break;
            }
            let slot = &self.slots[t];
            if slot.state.load(Ordering::Acquire) != SLOT_WRITTEN {
                core::hint::spin_loop();
                continue;
            }
            let entry = unsafe { *slot.entry.get() };
            if self
                .tail
                .compare_exchange(t, self.next(t), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                slot.state.store(SLOT_EMPTY, Ordering::Release);
                self.sink.emit(&entry);
                purged += 1;
            }
        }

        self.direct(LogLevel::Error, "log queue purge complete");
    }

    /// Drain one entry; `QueueEmpty` when none are Written
    ///
    /// Single-consumer by contract (the Logger worker); the tail CAS also
    /// arbitrates against the overflow purge.
    pub fn pop(&self) -> RuntimeResult<LogEntry> {
        loop {
            let t = self.tail.load(Ordering::Acquire);
            let h = self.head.load(Ordering::Acquire);
            if h == t {
                return Err(RuntimeError::QueueEmpty);
            }
            let slot = &self.slots[t];
            if slot.state.load(Ordering::Acquire) != SLOT_WRITTEN {
                // A producer holds this slot Reserved; its Written store is imminent
                core::hint::spin_loop();
                continue;
            }
            if self
                .tail
                .compare_exchange(t, self.next(t), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let entry = unsafe { *slot.entry.get() };
                slot.state.store(SLOT_EMPTY, Ordering::Release);
                return Ok(entry);
            }
        }
    }

    fn backoff(&self, attempt: u32) {
        let delay = (1u64 << attempt.min(10)).min(BACKOFF_CAP_MS);
        let jitter = rand::thread_rng().gen_range(0..=delay);
        std::thread::sleep(Duration::from_millis(jitter));
    }
}

impl Default for LogQueue {
    fn default() -> Self {
        Self::new()
    }
}
