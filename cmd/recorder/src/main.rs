//! Recorder process
//!
//! Builds the runtime, declares the worker table (logger, command
//! interface, relay listener, writer, optional file reader), then waits
//! for shutdown and tears everything down. Exit code 0 on clean shutdown,
//! non-zero on init failure or cleanup error.

use etherec::{
    command_descriptor, file_reader_descriptor, hex_preview, logctx, logger_descriptor,
    rec_error, rec_info, relay_descriptor, start_workers, CommandSettings, Config,
    FileReaderSettings, LogCtx, LoggerSettings, MsgProcessor, RelaySettings, Runtime,
    RuntimeError, WorkerDescriptor,
};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

fn usage(program: &str) {
    println!("Usage: {} [-c <config_path>] [-h]", program);
    println!("  -c <config_path>  configuration file (default: config.ini)");
    println!("  -h                print this help");
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "recorder".to_string());
    let mut config_path = PathBuf::from("config.ini");

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" => match args.next() {
                Some(path) => config_path = PathBuf::from(path),
                None => {
                    eprintln!("{}: -c requires a path", program);
                    usage(&program);
                    return 2;
                }
            },
            "-h" => {
                usage(&program);
                return 0;
            }
            other => {
                eprintln!("{}: unknown argument {:?}", program, other);
                usage(&program);
                return 2;
            }
        }
    }

    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let config = if config_path.exists() {
        match Config::load(&config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("cannot read {}: {}", config_path.display(), e);
                return 1;
            }
        }
    } else {
        eprintln!(
            "config {} not found; running with defaults",
            config_path.display()
        );
        Config::new()
    };

    let runtime = Runtime::new();
    if let Err(e) = runtime.install_signal_handlers() {
        eprintln!("cannot install signal handlers: {}", e);
        return 1;
    }

    // Main thread logs through the pipeline like any worker
    logctx::install(LogCtx {
        label: "MAIN".to_string(),
        queue: runtime.log_queue(),
        level: runtime.level_handle(),
    });

    let logger_settings = LoggerSettings::from_config(&config);
    let hex_row = logger_settings.hex_bytes_per_row;
    let hex_col = logger_settings.hex_bytes_per_col;

    let mut descriptors = vec![
        logger_descriptor(logger_settings),
        command_descriptor(CommandSettings::from_config(&config)),
        relay_descriptor(RelaySettings::from_config(&config)),
        writer_descriptor(&config, hex_row, hex_col),
    ];
    let reader_settings = FileReaderSettings::from_config(&config);
    if reader_settings.file_path.is_some() {
        descriptors.push(file_reader_descriptor(reader_settings));
    }

    let suppressed = config.suppressed_threads();
    if let Err(e) = start_workers(&runtime, descriptors, &suppressed) {
        rec_error!("worker startup failed: {}", e);
        runtime.shutdown().signal();
        let _ = runtime.registry().wait_all(5000);
        let _ = runtime.cleanup();
        return 1;
    }
    rec_info!("recorder up; {} workers", runtime.registry().labels().len());

    // Main loop: bounded waits so interrupts are observed promptly,
    // periodic liveness probe over the whole table
    while !runtime.shutdown().wait(1000) {
        let _ = runtime.registry().check_all();
    }

    rec_info!("shutdown signalled; waiting for workers");
    let mut code = 0;
    if runtime.registry().wait_all(10_000).is_err() {
        let stragglers: Vec<String> = runtime
            .registry()
            .labels()
            .into_iter()
            .filter(|l| !runtime.registry().get_state(l).is_terminal())
            .collect();
        rec_error!("workers still running at deadline: {:?}", stragglers);
        code = 1;
    }

    logctx::clear();
    if runtime.cleanup().is_err() {
        return 1;
    }
    code
}

/// The WRITER worker: pops chunk/relay messages and appends their payloads
/// to the configured output file
fn writer_descriptor(config: &Config, hex_row: usize, hex_col: usize) -> WorkerDescriptor {
    let output_path = PathBuf::from(config.get_str("writer.output_path", "recorded.bin"));
    let file = Arc::new(Mutex::new(None));

    let processor: MsgProcessor = Arc::new(move |_ctx, msg| {
        let mut guard = file.lock().map_err(|_| RuntimeError::LockError)?;
        if guard.is_none() {
            let opened = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&output_path)
                .map_err(|_| RuntimeError::SystemFailure("cannot open output file"))?;
            *guard = Some(opened);
        }
        let f: &mut std::fs::File = guard.as_mut().ok_or(RuntimeError::SystemFailure("output file missing"))?;
        f.write_all(msg.payload())
            .map_err(|_| RuntimeError::SystemFailure("output write failed"))?;

        let preview_len = msg.payload().len().min(hex_row * 2);
        etherec::rec_debug!(
            "recorded {} bytes\n{}",
            msg.payload().len(),
            hex_preview(&msg.payload()[..preview_len], hex_row, hex_col)
        );
        Ok(())
    });

    WorkerDescriptor::message_pump("WRITER", processor)
        .batch_size(16)
        .poll_interval_ms(100)
}
