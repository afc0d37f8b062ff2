//! Relay listener worker and socket wait helpers
//!
//! The relay worker accepts TCP peers and forwards every received payload
//! as a `Relay` message into the target worker's inbox. All socket waits
//! are bounded so shutdown is observed promptly.

use crate::config::Config;
use crate::worker::{WorkerContext, WorkerDescriptor, WorkerExit};
use crate::{rec_debug, rec_error, rec_info, rec_warn};
use etherec_core::constants::CONTENT_MAX;
use etherec_core::error::{RuntimeError, RuntimeResult};
use etherec_core::message::{Message, MsgType};
use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

/// Bounded socket-readable wait, milliseconds
pub const SOCKET_WAIT_MS: u16 = 5000;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use std::os::fd::AsFd;

        /// Wait until `fd` is readable or `timeout_ms` elapses
        pub fn wait_readable<F: AsFd>(fd: &F, timeout_ms: u16) -> RuntimeResult<bool> {
            use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

            let mut fds = [PollFd::new(fd.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(timeout_ms)) {
                Ok(0) => Ok(false),
                Ok(_) => Ok(true),
                Err(nix::errno::Errno::EINTR) => Ok(false),
                Err(_) => Err(RuntimeError::WaitError),
            }
        }
    } else {
        /// Without poll support the caller falls through to a blocking read
        pub fn wait_readable<F>(_fd: &F, _timeout_ms: u16) -> RuntimeResult<bool> {
            Ok(true)
        }
    }
}

/// Relay worker configuration, read from the `relay.*` config keys
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub listening_port: u16,
    /// Label of the inbox that receives forwarded payloads
    pub target_thread: String,
    pub queue_timeout_ms: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            listening_port: 4200,
            target_thread: "WRITER".to_string(),
            queue_timeout_ms: 500,
        }
    }
}

impl RelaySettings {
    pub fn from_config(cfg: &Config) -> Self {
        let d = Self::default();
        Self {
            listening_port: cfg.get("relay.listening_port", d.listening_port),
            target_thread: cfg.get_str("relay.target_thread", &d.target_thread),
            queue_timeout_ms: cfg.get("relay.queue_timeout_ms", d.queue_timeout_ms),
        }
    }
}

/// Build the RELAY worker descriptor
pub fn relay_descriptor(settings: RelaySettings) -> WorkerDescriptor {
    WorkerDescriptor::new(
        "RELAY",
        Arc::new(move |ctx: &WorkerContext| relay_main(ctx, &settings)),
    )
}

fn relay_main(ctx: &WorkerContext, settings: &RelaySettings) -> WorkerExit {
    let listener = match TcpListener::bind(("0.0.0.0", settings.listening_port)) {
        Ok(l) => l,
        Err(e) => {
            rec_error!("relay cannot bind port {}: {}", settings.listening_port, e);
            return WorkerExit::Error;
        }
    };
    rec_info!("relay listening on port {}", settings.listening_port);
    serve(ctx, settings, &listener)
}

/// Accept loop; split out so tests can inject a pre-bound listener
pub fn serve(ctx: &WorkerContext, settings: &RelaySettings, listener: &TcpListener) -> WorkerExit {
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
                rec_info!("relay peer connected: {}", peer);
                forward_peer(ctx, settings, stream);
                rec_info!("relay peer gone: {}", peer);
            }
            Err(e) => {
                rec_warn!("relay accept failed: {}", e);
            }
        }
    }
}

/// Read payloads from one peer until close or shutdown
fn forward_peer(ctx: &WorkerContext, settings: &RelaySettings, mut stream: TcpStream) {
    let mut buf = [0u8; CONTENT_MAX];
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
                rec_warn!("relay read failed: {}", e);
                return;
            }
        };

        let msg = match Message::new(MsgType::Relay, &buf[..n]) {
            Ok(m) => m,
            Err(_) => continue,
        };
        match ctx.push_to(&settings.target_thread, &msg, settings.queue_timeout_ms) {
            Ok(()) => rec_debug!("relayed {} bytes to {}", n, settings.target_thread),
            Err(RuntimeError::QueueFull) => {
                rec_warn!("inbox {} full; relay payload dropped", settings.target_thread);
            }
            Err(e) => {
                rec_warn!("relay push to {} failed: {}", settings.target_thread, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use crate::worker::spawn_worker;
    use std::io::Write;

    #[test]
    fn test_relay_forwards_payload_to_target_inbox() {
        let rt = Runtime::new();
        rt.logger_ready().set();

        // The test thread owns the SINK inbox
        rt.registry().register("SINK", false, None).unwrap();
        rt.registry().init_queue("SINK").unwrap();
        rt.registry().bind_current_thread("SINK").unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let settings = RelaySettings {
            listening_port: port,
            target_thread: "SINK".to_string(),
            queue_timeout_ms: 500,
        };

        let main: crate::worker::MainFn = {
            let settings = settings.clone();
            Arc::new(move |ctx: &WorkerContext| serve(ctx, &settings, &listener))
        };
        spawn_worker(&rt, WorkerDescriptor::new("RELAY", main)).unwrap();

        let mut peer = TcpStream::connect(("127.0.0.1", port)).unwrap();
        peer.write_all(b"captured frame").unwrap();
        peer.flush().unwrap();

        let msg = rt.registry().pop_message("SINK", 5000).unwrap();
        assert_eq!(msg.msg_type(), MsgType::Relay);
        assert_eq!(msg.payload(), b"captured frame");

        drop(peer);
        rt.shutdown().signal();
        rt.registry().wait_all(10_000).unwrap();
        assert!(rt.registry().get_state("RELAY").is_terminal());
    }
}
