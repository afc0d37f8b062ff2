//! Fixed-layout inbox message record
//!
//! A `Message` is a header plus an inline content block. The whole record
//! is `Copy` so inbox slots are value copies - the queue never owns heap
//! payload pointers. Larger payloads are chunked into `FileChunk` messages
//! by the producer.

use crate::constants::CONTENT_MAX;
use crate::error::{RuntimeError, RuntimeResult};
use core::fmt;

/// Kind of message carried through an inbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MsgType {
    /// Payload received from a network peer, forwarded to another worker
    Relay = 0,

    /// Self-test traffic
    Test = 1,

    /// A chunk of a file being streamed
    FileChunk = 2,
}

impl From<MsgType> for u32 {
    fn from(t: MsgType) -> u32 {
        t as u32
    }
}

impl TryFrom<u32> for MsgType {
    type Error = RuntimeError;

    fn try_from(v: u32) -> RuntimeResult<Self> {
        match v {
            0 => Ok(MsgType::Relay),
            1 => Ok(MsgType::Test),
            2 => Ok(MsgType::FileChunk),
            _ => Err(RuntimeError::InvalidArgument("unknown message type")),
        }
    }
}

/// Message header
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct MessageHeader {
    msg_type: MsgType,
    content_size: u32,
}

/// A fixed-layout message: header plus inline content block
#[derive(Clone, Copy)]
#[repr(C)]
pub struct Message {
    header: MessageHeader,
    content: [u8; CONTENT_MAX],
}

impl Message {
    /// Build a message, copying `payload` into the content block
    ///
    /// Fails with `InvalidArgument` when the payload exceeds `CONTENT_MAX`.
    pub fn new(msg_type: MsgType, payload: &[u8]) -> RuntimeResult<Self> {
        if payload.len() > CONTENT_MAX {
            return Err(RuntimeError::InvalidArgument("content exceeds CONTENT_MAX"));
        }
        let mut content = [0u8; CONTENT_MAX];
        content[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            header: MessageHeader {
                msg_type,
                content_size: payload.len() as u32,
            },
            content,
        })
    }

    /// An empty message of the given type
    pub fn empty(msg_type: MsgType) -> Self {
        Self {
            header: MessageHeader {
                msg_type,
                content_size: 0,
            },
            content: [0u8; CONTENT_MAX],
        }
    }

    /// Message kind
    #[inline]
    pub fn msg_type(&self) -> MsgType {
        self.header.msg_type
    }

    /// Bytes valid in the content block
    #[inline]
    pub fn content_size(&self) -> usize {
        self.header.content_size as usize
    }

    /// The valid payload slice
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.content[..self.content_size()]
    }

    /// Check the header invariant before enqueue
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.content_size() <= CONTENT_MAX
    }
}

// Message is 2KB+; dumping the whole content block would swamp debug output
impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("msg_type", &self.header.msg_type)
            .field("content_size", &self.header.content_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_copies_payload() {
        let msg = Message::new(MsgType::Test, b"hello").unwrap();
        assert_eq!(msg.msg_type(), MsgType::Test);
        assert_eq!(msg.content_size(), 5);
        assert_eq!(msg.payload(), b"hello");
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let big = vec![0u8; CONTENT_MAX + 1];
        assert!(matches!(
            Message::new(MsgType::FileChunk, &big),
            Err(RuntimeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_max_payload_accepted() {
        let max = vec![0xABu8; CONTENT_MAX];
        let msg = Message::new(MsgType::Relay, &max).unwrap();
        assert_eq!(msg.content_size(), CONTENT_MAX);
        assert!(msg.is_valid());
    }

    #[test]
    fn test_empty() {
        let msg = Message::empty(MsgType::Relay);
        assert_eq!(msg.content_size(), 0);
        assert!(msg.payload().is_empty());
    }

    #[test]
    fn test_msg_type_roundtrip() {
        for t in [MsgType::Relay, MsgType::Test, MsgType::FileChunk] {
            assert_eq!(MsgType::try_from(u32::from(t)).unwrap(), t);
        }
        assert!(MsgType::try_from(99).is_err());
    }
}
