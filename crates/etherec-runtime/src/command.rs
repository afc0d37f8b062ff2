//! Command interface worker
//!
//! Listens on the configured TCP port, feeds received bytes through the
//! framed-protocol state machine and writes back the ACK frames it emits.
//! Framing errors are WARN lines, never disconnects; the connection ends
//! only on socket error, orderly close or shutdown.

use crate::config::Config;
use crate::net::{wait_readable, SOCKET_WAIT_MS};
use crate::worker::{WorkerContext, WorkerDescriptor, WorkerExit};
use crate::{rec_debug, rec_error, rec_info, rec_warn};
use etherec_core::constants::DEFAULT_MAX_MESSAGE_SIZE;
use etherec_core::fsm::{CommandFsm, FsmOutput};
use etherec_core::logq::LogLevel;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

/// Command interface configuration, from the `command_interface.*` keys
#[derive(Debug, Clone)]
pub struct CommandSettings {
    pub listening_port: u16,
    pub max_message_size: usize,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            listening_port: 4150,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl CommandSettings {
    pub fn from_config(cfg: &Config) -> Self {
        let d = Self::default();
        Self {
            listening_port: cfg.get("command_interface.listening_port", d.listening_port),
            max_message_size: cfg.get("command_interface.max_message_size", d.max_message_size),
        }
    }
}

/// Build the COMMAND worker descriptor
pub fn command_descriptor(settings: CommandSettings) -> WorkerDescriptor {
    WorkerDescriptor::new(
        "COMMAND",
        Arc::new(move |ctx: &WorkerContext| command_main(ctx, &settings)),
    )
}

fn command_main(ctx: &WorkerContext, settings: &CommandSettings) -> WorkerExit {
    let listener = match TcpListener::bind(("0.0.0.0", settings.listening_port)) {
        Ok(l) => l,
        Err(e) => {
            rec_error!(
                "command interface cannot bind port {}: {}",
                settings.listening_port,
                e
            );
            return WorkerExit::Error;
        }
    };
    rec_info!(
        "command interface listening on port {}",
        settings.listening_port
    );
    serve(ctx, settings, &listener)
}

/// Accept loop; split out so tests can inject a pre-bound listener
pub fn serve(ctx: &WorkerContext, settings: &CommandSettings, listener: &TcpListener) -> WorkerExit {
    loop {
        if ctx.is_shutdown() {
            return WorkerExit::Shutdown;
        }
        match wait_readable(listener, SOCKET_WAIT_MS) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(_) => return WorkerExit::Error,
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                rec_info!("command peer connected: {}", peer);
                handle_connection(ctx, settings, stream);
                rec_info!("command peer gone: {}", peer);
            }
            Err(e) => {
                rec_warn!("command accept failed: {}", e);
            }
        }
    }
}

/// Drive one connection's state machine until close, error or shutdown
fn handle_connection(ctx: &WorkerContext, settings: &CommandSettings, mut stream: TcpStream) {
    let mut fsm = CommandFsm::with_max_message(settings.max_message_size);
    let mut buf = [0u8; 1024];

    loop {
        if ctx.is_shutdown() {
            return;
        }
        match wait_readable(&stream, SOCKET_WAIT_MS) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(_) => return,
        }
        let n = match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                rec_warn!("command read failed: {}", e);
                return;
            }
        };

        for output in fsm.on_bytes(&buf[..n]) {
            match output {
                FsmOutput::Command { body, index } => {
                    rec_debug!("command packet {} received: {:?}", index, body);
                    dispatch_command(ctx, &body);
                }
                FsmOutput::Ack(frame) => {
                    if let Err(e) = stream.write_all(&frame) {
                        rec_warn!("command ack write failed: {}", e);
                        return;
                    }
                }
                FsmOutput::Error(e) => {
                    rec_warn!("framing error, resyncing: {}", e);
                }
            }
        }
    }
}

/// Apply one decoded command body
///
/// `log_level = <level>` changes the pipeline's minimum level. Unknown
/// verbs are a non-fatal warning; the packet is still acknowledged.
pub fn dispatch_command(ctx: &WorkerContext, body: &str) {
    let body = body.trim();
    if body.is_empty() {
        rec_debug!("empty command body ignored");
        return;
    }

    match body.split_once('=') {
        Some((key, value)) if key.trim() == "log_level" => match LogLevel::parse(value) {
            Some(level) => {
                ctx.runtime().set_log_level(level);
                rec_info!("log level set to {}", level);
            }
            None => {
                rec_warn!("bad log_level value: {:?}", value.trim());
            }
        },
        _ => {
            rec_warn!("unknown command: {:?}", body);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use crate::worker::spawn_worker;
    use byteorder::{BigEndian, ByteOrder};
    use etherec_core::constants::{END_MARKER, START_MARKER};
    use etherec_core::fsm::encode_frame;

    fn ready_runtime() -> Arc<Runtime> {
        let rt = Runtime::new();
        rt.logger_ready().set();
        rt
    }

    #[test]
    fn test_dispatch_log_level_verb() {
        let rt = ready_runtime();
        let ctx = WorkerContext::new("COMMAND", Arc::clone(&rt));

        assert_eq!(rt.log_level(), LogLevel::Info);
        dispatch_command(&ctx, "log_level = debug");
        assert_eq!(rt.log_level(), LogLevel::Debug);

        // Unknown verbs and bad values are non-fatal
        dispatch_command(&ctx, "self_destruct = now");
        dispatch_command(&ctx, "log_level = shouty");
        assert_eq!(rt.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_command_session_over_tcp() {
        let rt = ready_runtime();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let settings = CommandSettings::default();

        let main: crate::worker::MainFn = {
            let settings = settings.clone();
            Arc::new(move |ctx: &WorkerContext| serve(ctx, &settings, &listener))
        };
        spawn_worker(&rt, WorkerDescriptor::new("COMMAND", main)).unwrap();

        let mut peer = TcpStream::connect(("127.0.0.1", port)).unwrap();
        peer.write_all(&encode_frame(b"log_level = trace", 7)).unwrap();

        // ACK: START | LENGTH | ACK_INDEX | "ACK 7" | END
        let mut ack = vec![0u8; 21];
        peer.read_exact(&mut ack).unwrap();
        assert_eq!(BigEndian::read_u32(&ack[0..4]), START_MARKER);
        assert_eq!(BigEndian::read_u32(&ack[4..8]), 21);
        assert_eq!(BigEndian::read_u32(&ack[8..12]), 1);
        assert_eq!(&ack[12..17], b"ACK 7");
        assert_eq!(BigEndian::read_u32(&ack[17..21]), END_MARKER);

        // The verb took effect in the runtime
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while rt.log_level() != LogLevel::Trace && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(rt.log_level(), LogLevel::Trace);

        drop(peer);
        rt.shutdown().signal();
        rt.registry().wait_all(10_000).unwrap();
    }
}
