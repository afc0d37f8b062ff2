//! Logger drain worker
//!
//! A dedicated worker that drains the shared log queue and renders each
//! entry as `{timestamp} {LEVEL} [{label}] {message}` to the console and,
//! when configured, to a log file. Every other worker's init blocks on the
//! readiness event this worker sets, so no entry is pushed before the
//! drain is servicing the queue.
//!
//! While the queue reports console suspension (backpressure), console
//! writes are elided; file writes continue.

use crate::worker::{WorkerContext, WorkerDescriptor, WorkerExit};
use chrono::DateTime;
use etherec_core::logq::{LogEntry, LogLevel};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Entries rendered per drain sweep before rechecking shutdown
const DRAIN_BATCH: usize = 64;

/// Idle wait between empty sweeps
const IDLE_WAIT_MS: u64 = 50;

/// Logger configuration, read from the `logger.*` config keys
#[derive(Debug, Clone)]
pub struct LoggerSettings {
    /// Append-mode log file; `None` logs to console only
    pub log_file: Option<PathBuf>,
    /// Minimum level accepted into the pipeline
    pub level: LogLevel,
    /// Hex preview shape for recorded payloads
    pub hex_bytes_per_row: usize,
    pub hex_bytes_per_col: usize,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            log_file: None,
            level: LogLevel::Info,
            hex_bytes_per_row: 16,
            hex_bytes_per_col: 8,
        }
    }
}

impl LoggerSettings {
    pub fn from_config(cfg: &crate::config::Config) -> Self {
        let d = Self::default();
        Self {
            log_file: cfg.get_opt::<PathBuf>("logger.log_file"),
            level: cfg
                .get_opt::<String>("logger.level")
                .and_then(|s| LogLevel::parse(&s))
                .unwrap_or(d.level),
            hex_bytes_per_row: cfg.get("logger.hex_dump_bytes_per_row", d.hex_bytes_per_row),
            hex_bytes_per_col: cfg.get("logger.hex_dump_bytes_per_col", d.hex_bytes_per_col),
        }
    }
}

/// Build the LOGGER worker descriptor
///
/// The logger skips the readiness barrier it provides for everyone else.
pub fn logger_descriptor(settings: LoggerSettings) -> WorkerDescriptor {
    WorkerDescriptor::new(
        "LOGGER",
        Arc::new(move |ctx: &WorkerContext| logger_main(ctx, &settings)),
    )
    .no_logger_wait()
}

fn logger_main(ctx: &WorkerContext, settings: &LoggerSettings) -> WorkerExit {
    let runtime = ctx.runtime();
    runtime.set_log_level(settings.level);

    let mut file = settings.log_file.as_ref().and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => Some(f),
            Err(e) => {
                eprintln!("LOGGER: cannot open {}: {}; console only", path.display(), e);
                None
            }
        }
    });

    let queue = runtime.log_queue();

    // From here on the queue is being serviced; release the init barrier
    runtime.logger_ready().set();

    loop {
        let mut drained = 0;
        for _ in 0..DRAIN_BATCH {
            match queue.pop() {
                Ok(entry) => {
                    emit(&entry, !queue.is_console_suspended(), file.as_mut());
                    drained += 1;
                }
                Err(_) => break,
            }
        }

        if drained == 0 {
            if ctx.is_shutdown() {
                break;
            }
            ctx.wait_shutdown(IDLE_WAIT_MS);
        }
    }

    // Final sweep: everything enqueued before the shutdown signal lands
    while let Ok(entry) = queue.pop() {
        emit(&entry, true, file.as_mut());
    }
    if let Some(f) = file.as_mut() {
        let _ = f.flush();
    }
    WorkerExit::Shutdown
}

fn emit(entry: &LogEntry, to_console: bool, file: Option<&mut File>) {
    let line = format_line(entry);
    if to_console {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        let _ = handle.write_all(line.as_bytes());
        let _ = handle.write_all(b"\n");
    }
    if let Some(f) = file {
        let _ = f.write_all(line.as_bytes());
        let _ = f.write_all(b"\n");
    }
}

/// Render one entry: `2026-01-31 12:00:00.123 INFO  [LABEL] message`
pub fn format_line(entry: &LogEntry) -> String {
    let ts = DateTime::from_timestamp_millis(entry.timestamp_ms as i64)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| entry.timestamp_ms.to_string());
    format!("{} {} [{}] {}", ts, entry.level.name(), entry.label, entry.text)
}

/// Hex preview of a payload, `bytes_per_row` bytes per line grouped into
/// columns of `bytes_per_col`
pub fn hex_preview(data: &[u8], bytes_per_row: usize, bytes_per_col: usize) -> String {
    let per_row = bytes_per_row.max(1);
    let per_col = bytes_per_col.max(1);
    let mut out = String::new();
    for (row, chunk) in data.chunks(per_row).enumerate() {
        if row > 0 {
            out.push('\n');
        }
        for (i, byte) in chunk.iter().enumerate() {
            if i > 0 {
                out.push(' ');
                if i % per_col == 0 {
                    out.push(' ');
                }
            }
            out.push_str(&format!("{:02X}", byte));
        }
    }
    out
}
