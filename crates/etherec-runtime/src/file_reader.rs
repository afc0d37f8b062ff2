//! File reader worker
//!
//! Streams a configured file into `FileChunk` messages pushed to a peer
//! worker's inbox. Modes: `once` reads to EOF and exits, `loop` rewinds
//! after a delay and reads again, `watch` is a reserved value that behaves
//! as `once`.

use crate::config::Config;
use crate::worker::{WorkerContext, WorkerDescriptor, WorkerExit};
use crate::{rec_error, rec_info, rec_warn};
use etherec_core::constants::CONTENT_MAX;
use etherec_core::error::RuntimeError;
use etherec_core::message::{Message, MsgType};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// What happens at end of file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Read to EOF and exit
    Once,
    /// Rewind after `reload_delay_ms` and read again
    Loop,
    /// Reserved; currently behaves as `once`
    Watch,
}

impl ReadMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "once" => Some(ReadMode::Once),
            "loop" => Some(ReadMode::Loop),
            "watch" => Some(ReadMode::Watch),
            _ => None,
        }
    }
}

/// File reader configuration, from the `file_reader.*` config keys
#[derive(Debug, Clone)]
pub struct FileReaderSettings {
    /// Input file; `None` disables the reader
    pub file_path: Option<PathBuf>,
    /// Label of the inbox receiving the chunks
    pub target_thread: String,
    pub read_mode: ReadMode,
    pub chunk_size: usize,
    pub chunk_delay_ms: u64,
    pub reload_delay_ms: u64,
    pub queue_timeout_ms: u64,
    pub max_queue_size: usize,
    pub block_when_full: bool,
    pub log_progress: bool,
    pub progress_interval_ms: u64,
}

impl Default for FileReaderSettings {
    fn default() -> Self {
        Self {
            file_path: None,
            target_thread: "WRITER".to_string(),
            read_mode: ReadMode::Once,
            chunk_size: 1024,
            chunk_delay_ms: 0,
            reload_delay_ms: 1000,
            queue_timeout_ms: 500,
            max_queue_size: 1024,
            block_when_full: false,
            log_progress: true,
            progress_interval_ms: 1000,
        }
    }
}

impl FileReaderSettings {
    pub fn from_config(cfg: &Config) -> Self {
        let d = Self::default();
        let mode = cfg
            .get_opt::<String>("file_reader.read_mode")
            .and_then(|s| ReadMode::parse(&s))
            .unwrap_or(d.read_mode);
        Self {
            file_path: cfg.get_opt::<PathBuf>("file_reader.file_path"),
            target_thread: cfg.get_str("file_reader.target_thread", &d.target_thread),
            read_mode: mode,
            chunk_size: cfg.get("file_reader.chunk_size", d.chunk_size),
            chunk_delay_ms: cfg.get("file_reader.chunk_delay_ms", d.chunk_delay_ms),
            reload_delay_ms: cfg.get("file_reader.reload_delay_ms", d.reload_delay_ms),
            queue_timeout_ms: cfg.get("file_reader.queue_timeout_ms", d.queue_timeout_ms),
            max_queue_size: cfg.get("file_reader.max_queue_size", d.max_queue_size),
            block_when_full: cfg.get_bool("file_reader.block_when_full", d.block_when_full),
            log_progress: cfg.get_bool("file_reader.log_progress", d.log_progress),
            progress_interval_ms: cfg.get("file_reader.progress_interval_ms", d.progress_interval_ms),
        }
    }
}

/// Build the FILE_READER worker descriptor
pub fn file_reader_descriptor(settings: FileReaderSettings) -> WorkerDescriptor {
    WorkerDescriptor::new(
        "FILE_READER",
        Arc::new(move |ctx: &WorkerContext| reader_main(ctx, &settings)),
    )
}

fn reader_main(ctx: &WorkerContext, settings: &FileReaderSettings) -> WorkerExit {
    let path = match &settings.file_path {
        Some(p) => p,
        None => {
            rec_warn!("file reader has no file configured; exiting");
            return WorkerExit::Success;
        }
    };
    if settings.read_mode == ReadMode::Watch {
        rec_warn!("read_mode watch is reserved; reading once");
    }

    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            rec_error!("file reader cannot open {}: {}", path.display(), e);
            return WorkerExit::Error;
        }
    };
    rec_info!("file reader streaming {} to {}", path.display(), settings.target_thread);

    let mut buf = vec![0u8; settings.chunk_size.clamp(1, CONTENT_MAX)];
    let mut chunks: u64 = 0;
    let mut bytes: u64 = 0;
    let mut last_progress = Instant::now();

    loop {
        if ctx.is_shutdown() {
            return WorkerExit::Shutdown;
        }

        let n = match file.read(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                rec_error!("file reader read failed: {}", e);
                return WorkerExit::Error;
            }
        };

        if n == 0 {
            match settings.read_mode {
                ReadMode::Loop => {
                    if ctx.wait_shutdown(settings.reload_delay_ms) {
                        return WorkerExit::Shutdown;
                    }
                    if file.seek(SeekFrom::Start(0)).is_err() {
                        return WorkerExit::Error;
                    }
                    continue;
                }
                ReadMode::Once | ReadMode::Watch => {
                    rec_info!("file reader done: {} chunks, {} bytes", chunks, bytes);
                    return WorkerExit::Success;
                }
            }
        }

        let msg = match Message::new(MsgType::FileChunk, &buf[..n]) {
            Ok(m) => m,
            Err(e) => {
                rec_error!("file reader chunk rejected: {}", e);
                return WorkerExit::Error;
            }
        };

        if !push_chunk(ctx, settings, &msg) {
            return WorkerExit::Shutdown;
        }
        chunks += 1;
        bytes += n as u64;

        if settings.log_progress
            && last_progress.elapsed().as_millis() as u64 >= settings.progress_interval_ms
        {
            rec_info!("file reader progress: {} chunks, {} bytes", chunks, bytes);
            last_progress = Instant::now();
        }

        if settings.chunk_delay_ms > 0 && ctx.wait_shutdown(settings.chunk_delay_ms) {
            return WorkerExit::Shutdown;
        }
    }
}

/// Push one chunk; blocking mode retries until shutdown, otherwise a full
/// inbox drops the chunk with a warning. Returns false when shutdown ended
/// a blocking retry.
fn push_chunk(ctx: &WorkerContext, settings: &FileReaderSettings, msg: &Message) -> bool {
    loop {
        match ctx.push_to(&settings.target_thread, msg, settings.queue_timeout_ms) {
            Ok(()) => return true,
            Err(RuntimeError::QueueFull) if settings.block_when_full => {
                if ctx.is_shutdown() {
                    return false;
                }
            }
            Err(RuntimeError::QueueFull) => {
                rec_warn!("inbox {} full; chunk dropped", settings.target_thread);
                return true;
            }
            Err(e) => {
                rec_warn!("push to {} failed: {}", settings.target_thread, e);
                return true;
            }
        }
    }
}
