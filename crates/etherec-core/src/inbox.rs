//! Bounded per-worker inbox queue
//!
//! A ring of preallocated `Message` slots with blocking push/pop. Any
//! thread may push; only the owning worker pops (ownership is enforced one
//! level up, by the registry). One slot is sacrificed so that full and
//! empty are distinguishable from the head/tail indices alone.

use crate::constants::{DEFAULT_INBOX_SIZE, LABEL_MAX};
use crate::error::{RuntimeError, RuntimeResult};
use crate::label::FixedStr;
use crate::message::{Message, MsgType};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Wait forever
pub const INFINITE: u64 = u64::MAX;

struct Ring {
    entries: Box<[Message]>,
    /// Next slot to pop
    head: usize,
    /// Next slot to fill
    tail: usize,
}

impl Ring {
    #[inline]
    fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    #[inline]
    fn is_full(&self, max_size: usize) -> bool {
        (self.tail + 1) % max_size == self.head
    }

    #[inline]
    fn len(&self, max_size: usize) -> usize {
        (self.tail + max_size - self.head) % max_size
    }
}

/// Bounded multi-producer single-consumer inbox
pub struct InboxQueue {
    ring: Mutex<Ring>,
    not_empty: Condvar,
    not_full: Condvar,
    max_size: usize,
    owner_label: FixedStr<{ LABEL_MAX + 1 }>,
}

impl InboxQueue {
    /// Create an inbox with the default capacity
    pub fn new(owner_label: &str) -> Self {
        Self::with_capacity(owner_label, DEFAULT_INBOX_SIZE)
    }

    /// Create an inbox holding up to `max_size - 1` messages
    pub fn with_capacity(owner_label: &str, max_size: usize) -> Self {
        let max_size = max_size.max(2);
        let entries = vec![Message::empty(MsgType::Test); max_size].into_boxed_slice();
        Self {
            ring: Mutex::new(Ring {
                entries,
                head: 0,
                tail: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            max_size,
            owner_label: FixedStr::new(owner_label),
        }
    }

    /// Label of the worker that owns the pop side
    #[inline]
    pub fn owner_label(&self) -> &str {
        self.owner_label.as_str()
    }

    /// Number of messages currently queued
    pub fn len(&self) -> usize {
        match self.ring.lock() {
            Ok(g) => g.len(self.max_size),
            Err(_) => 0,
        }
    }

    /// True when no messages are queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest number of messages the inbox can hold
    #[inline]
    pub fn capacity(&self) -> usize {
        self.max_size - 1
    }

    /// Enqueue a copy of `msg`, waiting up to `timeout_ms` for space
    ///
    /// `timeout_ms = 0` fails immediately when full; `INFINITE` waits
    /// forever. Fails with `QueueFull` when the inbox stays full past the
    /// timeout, `InvalidArgument` when the message header is malformed.
    pub fn push(&self, msg: &Message, timeout_ms: u64) -> RuntimeResult<()> {
        if !msg.is_valid() {
            return Err(RuntimeError::InvalidArgument("content exceeds CONTENT_MAX"));
        }

        let mut ring = self.ring.lock()?;
        ring = self.wait_while(ring, timeout_ms, &self.not_full, |r, max| r.is_full(max))?;
        if ring.is_full(self.max_size) {
            return Err(RuntimeError::QueueFull);
        }

        let tail = ring.tail;
        ring.entries[tail] = *msg;
        ring.tail = (tail + 1) % self.max_size;
        drop(ring);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue the oldest message, waiting up to `timeout_ms` for one
    ///
    /// Fails with `QueueEmpty` when the inbox stays empty past the timeout.
    pub fn pop(&self, timeout_ms: u64) -> RuntimeResult<Message> {
        let mut ring = self.ring.lock()?;
        ring = self.wait_while(ring, timeout_ms, &self.not_empty, |r, _| r.is_empty())?;
        if ring.is_empty() {
            return Err(RuntimeError::QueueEmpty);
        }

        let head = ring.head;
        let msg = ring.entries[head];
        ring.head = (head + 1) % self.max_size;
        drop(ring);

        self.not_full.notify_one();
        Ok(msg)
    }

    /// Wait on `condvar` while `blocked` holds, bounded by `timeout_ms`
    ///
    /// Returns with the lock held; the caller rechecks the predicate to
    /// distinguish success from timeout.
    fn wait_while<'a>(
        &self,
        mut ring: MutexGuard<'a, Ring>,
        timeout_ms: u64,
        condvar: &Condvar,
        blocked: impl Fn(&Ring, usize) -> bool,
    ) -> RuntimeResult<MutexGuard<'a, Ring>> {
        if timeout_ms == 0 {
            return Ok(ring);
        }
        let deadline = if timeout_ms == INFINITE {
            None
        } else {
            Instant::now().checked_add(Duration::from_millis(timeout_ms))
        };

        while blocked(&ring, self.max_size) {
            match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        break;
                    }
                    let (g, _) = condvar.wait_timeout(ring, d - now)?;
                    ring = g;
                }
                None => {
                    ring = condvar.wait(ring)?;
                }
            }
        }
        Ok(ring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn msg(byte: u8) -> Message {
        Message::new(MsgType::Test, &[byte]).unwrap()
    }

    #[test]
    fn test_fifo_order() {
        let q = InboxQueue::with_capacity("OWNER", 16);
        for i in 0..10u8 {
            q.push(&msg(i), 0).unwrap();
        }
        for i in 0..10u8 {
            assert_eq!(q.pop(0).unwrap().payload(), &[i]);
        }
    }

    #[test]
    fn test_effective_capacity_is_max_minus_one() {
        let q = InboxQueue::with_capacity("OWNER", 4);
        assert_eq!(q.capacity(), 3);
        for i in 0..3u8 {
            q.push(&msg(i), 0).unwrap();
        }
        assert_eq!(q.push(&msg(9), 0), Err(RuntimeError::QueueFull));
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn test_backpressure_timeout_then_retry() {
        let q = InboxQueue::with_capacity("OWNER", 4);
        for i in 0..3u8 {
            q.push(&msg(i), 0).unwrap();
        }

        let start = Instant::now();
        assert_eq!(q.push(&msg(3), 50), Err(RuntimeError::QueueFull));
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(45), "waited {:?}", waited);

        q.pop(0).unwrap();
        q.push(&msg(3), 50).unwrap();
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn test_pop_empty_times_out() {
        let q = InboxQueue::with_capacity("OWNER", 4);
        assert!(matches!(q.pop(0), Err(RuntimeError::QueueEmpty)));
        assert!(matches!(q.pop(20), Err(RuntimeError::QueueEmpty)));
    }

    #[test]
    fn test_push_wakes_blocked_pop() {
        let q = Arc::new(InboxQueue::with_capacity("OWNER", 4));
        let q2 = Arc::clone(&q);
        let consumer = thread::spawn(move || q2.pop(2000));
        thread::sleep(Duration::from_millis(20));
        q.push(&msg(7), 0).unwrap();
        assert_eq!(consumer.join().unwrap().unwrap().payload(), &[7]);
    }

    #[test]
    fn test_multi_producer_totals() {
        let q = Arc::new(InboxQueue::with_capacity("OWNER", 64));
        let mut producers = Vec::new();
        for p in 0..4u8 {
            let q = Arc::clone(&q);
            producers.push(thread::spawn(move || {
                for i in 0..10u8 {
                    q.push(&msg(p * 10 + i), INFINITE).unwrap();
                }
            }));
        }
        for h in producers {
            h.join().unwrap();
        }

        let mut seen = Vec::new();
        while let Ok(m) = q.pop(0) {
            seen.push(m.payload()[0]);
        }
        assert_eq!(seen.len(), 40);

        // FIFO per producer: each producer's bytes appear in its push order
        for p in 0..4u8 {
            let ours: Vec<u8> = seen.iter().copied().filter(|b| b / 10 == p).collect();
            let expected: Vec<u8> = (0..10u8).map(|i| p * 10 + i).collect();
            assert_eq!(ours, expected);
        }
    }

    #[test]
    fn test_occupancy_never_exceeds_capacity() {
        let q = Arc::new(InboxQueue::with_capacity("OWNER", 8));
        let q2 = Arc::clone(&q);
        let producer = thread::spawn(move || {
            for i in 0..200u8 {
                q2.push(&msg(i), INFINITE).unwrap();
            }
        });

        let mut popped = 0;
        while popped < 200 {
            assert!(q.len() <= q.capacity());
            if q.pop(10).is_ok() {
                popped += 1;
            }
        }
        producer.join().unwrap();
    }
}
