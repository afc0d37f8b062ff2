//! Framed command protocol state machine
//!
//! Recovers message boundaries from a TCP byte stream and produces the
//! acknowledgement frames to send back. The machine is pure - bytes in,
//! outputs out - so the network worker and the tests drive the same code.
//!
//! Wire layout, big-endian:
//!
//! ```text
//! START(4) | LENGTH(4) | INDEX(4) | BODY(LENGTH-16) | END(4)
//! ```
//!
//! `LENGTH` is the total packet size. The ACK frame uses the same layout
//! with an independent per-connection index and the body
//! `"ACK <received_index>"`.
//!
//! Framing errors are recovered locally (consume + resync); only
//! socket-level failures end a connection.

use crate::constants::{DEFAULT_MAX_MESSAGE_SIZE, END_MARKER, MIN_MESSAGE_SIZE, START_MARKER};
use byteorder::{BigEndian, ByteOrder};

/// Framing-layer failures; never propagated out of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("bad start marker")]
    BadStartMarker,

    #[error("bad length {0}")]
    BadLength(u32),

    #[error("bad end marker")]
    BadEndMarker,
}

/// Decoder states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FsmState {
    WaitStart,
    WaitLength,
    WaitMessage,
    SendAck,
}

/// What the machine produced while consuming input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsmOutput {
    /// A complete packet body, ready for the command dispatcher
    Command { body: String, index: u32 },

    /// An assembled ACK frame to write to the peer
    Ack(Vec<u8>),

    /// A recovered framing error, worth a WARN line
    Error(FrameError),
}

/// Encode a command frame carrying `body` with the given packet index
pub fn encode_frame(body: &[u8], index: u32) -> Vec<u8> {
    let total = MIN_MESSAGE_SIZE + body.len();
    let mut frame = Vec::with_capacity(total);
    frame.resize(12, 0);
    BigEndian::write_u32(&mut frame[0..4], START_MARKER);
    BigEndian::write_u32(&mut frame[4..8], total as u32);
    BigEndian::write_u32(&mut frame[8..12], index);
    frame.extend_from_slice(body);
    let end_at = frame.len();
    frame.resize(end_at + 4, 0);
    BigEndian::write_u32(&mut frame[end_at..], END_MARKER);
    frame
}

/// Encode the ACK for `recv_index` under the connection's `ack_index`
pub fn encode_ack(recv_index: u32, ack_index: u32) -> Vec<u8> {
    let body = format!("ACK {}", recv_index);
    encode_frame(body.as_bytes(), ack_index)
}

/// Per-connection decoder state
pub struct CommandFsm {
    buf: Vec<u8>,
    max_message: usize,
    expected_len: usize,
    recv_index: u32,
    ack_index: u32,
    state: FsmState,
}

impl CommandFsm {
    /// Decoder with the default maximum packet size
    pub fn new() -> Self {
        Self::with_max_message(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Decoder accepting packets up to `max_message` bytes total
    pub fn with_max_message(max_message: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_message),
            max_message: max_message.max(MIN_MESSAGE_SIZE),
            expected_len: 0,
            recv_index: 0,
            ack_index: 0,
            state: FsmState::WaitStart,
        }
    }

    /// Bytes buffered but not yet consumed
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feed received bytes and collect everything the machine produces
    pub fn on_bytes(&mut self, data: &[u8]) -> Vec<FsmOutput> {
        self.buf.extend_from_slice(data);
        let mut out = Vec::new();

        loop {
            match self.state {
                FsmState::WaitStart => {
                    if self.buf.len() < 4 {
                        break;
                    }
                    let marker = BigEndian::read_u32(&self.buf[..4]);
                    if marker == START_MARKER {
                        self.buf.drain(..4);
                        self.state = FsmState::WaitLength;
                    } else {
                        out.push(FsmOutput::Error(FrameError::BadStartMarker));
                        self.resync();
                    }
                }
                FsmState::WaitLength => {
                    if self.buf.len() < 4 {
                        break;
                    }
                    let length = BigEndian::read_u32(&self.buf[..4]);
                    if (length as usize) < MIN_MESSAGE_SIZE
                        || (length as usize) > self.max_message
                    {
                        out.push(FsmOutput::Error(FrameError::BadLength(length)));
                        self.fail();
                        continue;
                    }
                    self.buf.drain(..4);
                    self.expected_len = length as usize;
                    self.state = FsmState::WaitMessage;
                }
                FsmState::WaitMessage => {
                    // START and LENGTH are consumed; INDEX + BODY + END remain
                    let rest = self.expected_len - 8;
                    if self.buf.len() < rest {
                        break;
                    }
                    let end_at = rest - 4;
                    let end = BigEndian::read_u32(&self.buf[end_at..end_at + 4]);
                    if end != END_MARKER {
                        out.push(FsmOutput::Error(FrameError::BadEndMarker));
                        self.fail();
                        continue;
                    }
                    let index = BigEndian::read_u32(&self.buf[..4]);
                    let body = String::from_utf8_lossy(&self.buf[4..end_at])
                        .trim_end_matches('\0')
                        .to_string();
                    self.buf.drain(..rest);
                    self.recv_index = index;
                    out.push(FsmOutput::Command { body, index });
                    self.state = FsmState::SendAck;
                }
                FsmState::SendAck => {
                    self.ack_index = self.ack_index.wrapping_add(1);
                    out.push(FsmOutput::Ack(encode_ack(self.recv_index, self.ack_index)));
                    self.expected_len = 0;
                    self.state = FsmState::WaitStart;
                }
            }
        }

        out
    }

    /// Bad start marker: skip to the next candidate high byte of START
    /// (minimum one byte) and keep scanning
    fn resync(&mut self) {
        let high = (START_MARKER >> 24) as u8;
        let skip = self.buf[1..]
            .iter()
            .position(|&b| b == high)
            .map(|p| p + 1)
            .unwrap_or(self.buf.len());
        self.buf.drain(..skip);
    }

    /// Packet-level failure: drop everything buffered and restart framing
    fn fail(&mut self) {
        self.buf.clear();
        self.expected_len = 0;
        self.state = FsmState::WaitStart;
    }
}

impl Default for CommandFsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands(out: &[FsmOutput]) -> Vec<(String, u32)> {
        out.iter()
            .filter_map(|o| match o {
                FsmOutput::Command { body, index } => Some((body.clone(), *index)),
                _ => None,
            })
            .collect()
    }

    fn acks(out: &[FsmOutput]) -> Vec<Vec<u8>> {
        out.iter()
            .filter_map(|o| match o {
                FsmOutput::Ack(frame) => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    /// Decode an ACK frame back into (ack_index, body)
    fn decode_ack(frame: &[u8]) -> (u32, String) {
        assert_eq!(BigEndian::read_u32(&frame[0..4]), START_MARKER);
        let length = BigEndian::read_u32(&frame[4..8]) as usize;
        assert_eq!(length, frame.len());
        let index = BigEndian::read_u32(&frame[8..12]);
        let body = String::from_utf8(frame[12..length - 4].to_vec()).unwrap();
        assert_eq!(
            BigEndian::read_u32(&frame[length - 4..]),
            END_MARKER
        );
        (index, body)
    }

    #[test]
    fn test_frame_roundtrip_log_level() {
        // START | LENGTH=33 | INDEX=7 | "log_level = debug" | END
        let body = b"log_level = debug";
        let frame = encode_frame(body, 7);
        assert_eq!(frame.len(), 33);
        assert_eq!(&frame[..4], &[0xBA, 0xAD, 0xF0, 0x0D]);
        assert_eq!(&frame[4..8], &[0x00, 0x00, 0x00, 0x21]);
        assert_eq!(&frame[8..12], &[0x00, 0x00, 0x00, 0x07]);
        assert_eq!(&frame[frame.len() - 4..], &[0xDE, 0xAD, 0xBE, 0xEF]);

        let mut fsm = CommandFsm::new();
        let out = fsm.on_bytes(&frame);

        let cmds = commands(&out);
        assert_eq!(cmds, vec![("log_level = debug".to_string(), 7)]);

        let acks = acks(&out);
        assert_eq!(acks.len(), 1);
        let (ack_index, ack_body) = decode_ack(&acks[0]);
        assert_eq!(ack_index, 1);
        assert_eq!(ack_body, "ACK 7");
    }

    #[test]
    fn test_resync_on_bad_start() {
        // Stray END marker, then a complete empty-body packet with index 1
        let mut stream = vec![0xDE, 0xAD, 0xBE, 0xEF];
        stream.extend_from_slice(&encode_frame(b"", 1));

        let mut fsm = CommandFsm::new();
        let out = fsm.on_bytes(&stream);

        assert!(out.contains(&FsmOutput::Error(FrameError::BadStartMarker)));
        let cmds = commands(&out);
        assert_eq!(cmds, vec![(String::new(), 1)]);
        let acks = acks(&out);
        assert_eq!(acks.len(), 1);
        let (_, ack_body) = decode_ack(&acks[0]);
        assert_eq!(ack_body, "ACK 1");
    }

    #[test]
    fn test_byte_at_a_time_delivery() {
        let frame = encode_frame(b"status", 42);
        let mut fsm = CommandFsm::new();

        let mut all = Vec::new();
        for b in frame {
            all.extend(fsm.on_bytes(&[b]));
        }

        assert_eq!(commands(&all), vec![("status".to_string(), 42)]);
        assert_eq!(acks(&all).len(), 1);
        assert_eq!(fsm.buffered(), 0);
    }

    #[test]
    fn test_two_packets_one_read() {
        let mut stream = encode_frame(b"first", 1);
        stream.extend_from_slice(&encode_frame(b"second", 2));

        let mut fsm = CommandFsm::new();
        let out = fsm.on_bytes(&stream);

        assert_eq!(
            commands(&out),
            vec![("first".to_string(), 1), ("second".to_string(), 2)]
        );
        let acks = acks(&out);
        assert_eq!(acks.len(), 2);
        // ACK index is an independent per-connection counter
        assert_eq!(decode_ack(&acks[0]).0, 1);
        assert_eq!(decode_ack(&acks[1]).0, 2);
        assert_eq!(decode_ack(&acks[1]).1, "ACK 2");
    }

    #[test]
    fn test_bad_length_consumes_buffer() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&[0xBA, 0xAD, 0xF0, 0x0D]);
        stream.extend_from_slice(&[0x00, 0x00, 0x00, 0x04]); // below minimum
        stream.extend_from_slice(b"junk that should be discarded");

        let mut fsm = CommandFsm::new();
        let out = fsm.on_bytes(&stream);

        assert!(out.contains(&FsmOutput::Error(FrameError::BadLength(4))));
        assert!(commands(&out).is_empty());
        assert_eq!(fsm.buffered(), 0);

        // The connection recovers: a fresh packet decodes normally
        let out = fsm.on_bytes(&encode_frame(b"after", 9));
        assert_eq!(commands(&out), vec![("after".to_string(), 9)]);
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut fsm = CommandFsm::with_max_message(64);
        let mut stream = Vec::new();
        stream.extend_from_slice(&[0xBA, 0xAD, 0xF0, 0x0D]);
        stream.extend_from_slice(&[0x00, 0x00, 0x01, 0x00]); // 256 > 64

        let out = fsm.on_bytes(&stream);
        assert!(out.contains(&FsmOutput::Error(FrameError::BadLength(256))));
    }

    #[test]
    fn test_bad_end_marker_recovers() {
        let mut frame = encode_frame(b"corrupt", 3);
        let at = frame.len() - 4;
        frame[at..].copy_from_slice(&[0, 0, 0, 0]);

        let mut fsm = CommandFsm::new();
        let out = fsm.on_bytes(&frame);

        assert!(out.contains(&FsmOutput::Error(FrameError::BadEndMarker)));
        assert!(commands(&out).is_empty());

        let out = fsm.on_bytes(&encode_frame(b"clean", 4));
        assert_eq!(commands(&out), vec![("clean".to_string(), 4)]);
    }

    #[test]
    fn test_trailing_nul_stripped() {
        let frame = encode_frame(b"log_level = info\0", 5);
        let mut fsm = CommandFsm::new();
        let out = fsm.on_bytes(&frame);
        assert_eq!(commands(&out), vec![("log_level = info".to_string(), 5)]);
    }
}
