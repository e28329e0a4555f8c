//! Outbound byte buffering
//!
//! [`ByteSerializer`] queues outbound frames and drains them into a
//! [`ByteSink`] a bounded amount at a time. Once everything queued has been
//! handed over the buffer is logically reset, so memory stays bounded by the
//! largest backlog rather than the lifetime traffic.
//!
//! [`WaitableByteSerializer`] puts one lock around a serializer and adds a
//! blocking [`wait_and_drain`](WaitableByteSerializer::wait_and_drain) for a
//! dedicated writer thread.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::frame::WireFrame;
use crate::io::ByteSink;

/// Queue of outbound bytes with a drain cursor.
///
/// `populated` is the length of the queued bytes, `serialized` the prefix
/// already handed to a sink. `serialized <= populated` always holds.
#[derive(Debug, Default)]
pub struct ByteSerializer {
    buffer: Vec<u8>,
    serialized: usize,
}

impl ByteSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            serialized: 0,
        }
    }

    /// Bytes appended since the last reset
    #[inline]
    pub fn populated(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes already handed to a sink since the last reset
    #[inline]
    pub fn serialized(&self) -> usize {
        self.serialized
    }

    /// Bytes queued but not yet drained
    #[inline]
    pub fn pending(&self) -> &[u8] {
        &self.buffer[self.serialized..]
    }

    #[inline]
    pub fn has_drained_all(&self) -> bool {
        self.serialized == self.buffer.len()
    }

    /// Append raw bytes at the tail.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Append one encoded frame at the tail.
    pub fn append_frame<F>(&mut self, frame: &F)
    where
        F: WireFrame + ?Sized,
    {
        frame.write_frame(&mut self.buffer);
    }

    /// Hand up to `max_bytes` pending bytes to `sink`.
    ///
    /// Returns how many bytes the sink took.
    pub fn drain<S>(&mut self, sink: &mut S, max_bytes: usize) -> usize
    where
        S: ByteSink + ?Sized,
    {
        let n = max_bytes.min(self.buffer.len() - self.serialized);
        if n == 0 {
            return 0;
        }
        let taken = sink
            .consume(&self.buffer[self.serialized..self.serialized + n])
            .min(n);
        if taken > 0 {
            self.serialized += taken;
            if self.has_drained_all() {
                self.reset();
            }
        }
        taken
    }

    /// Forget everything queued, keeping capacity.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.serialized = 0;
    }
}

#[derive(Debug, Default)]
struct Shared {
    serializer: ByteSerializer,
    has_pending: bool,
    closed: bool,
}

impl Shared {
    #[inline]
    fn refresh(&mut self) -> bool {
        self.has_pending = !self.serializer.has_drained_all();
        self.has_pending
    }
}

/// A [`ByteSerializer`] behind one lock, with a blocking drain.
///
/// Every operation runs under the same mutex. The pending flag is refreshed
/// under that mutex after each append and drain, so a waiter can never miss
/// an append that happens between its check and its sleep.
#[derive(Debug, Default)]
pub struct WaitableByteSerializer {
    shared: Mutex<Shared>,
    pending: Condvar,
}

impl WaitableByteSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the serializer under the lock.
    ///
    /// The pending flag is refreshed afterwards and waiters are woken if
    /// anything is queued. Callers use this to pair an append or drain with
    /// work that must observe the same queue state.
    pub fn with<R>(&self, f: impl FnOnce(&mut ByteSerializer) -> R) -> R {
        let mut shared = self.lock();
        let result = f(&mut shared.serializer);
        if shared.refresh() {
            self.pending.notify_all();
        }
        result
    }

    pub fn append(&self, bytes: &[u8]) {
        self.with(|s| s.append(bytes));
    }

    pub fn append_frame<F>(&self, frame: &F)
    where
        F: WireFrame + ?Sized,
    {
        self.with(|s| s.append_frame(frame));
    }

    /// Non-blocking drain.
    pub fn drain<S>(&self, sink: &mut S, max_bytes: usize) -> usize
    where
        S: ByteSink + ?Sized,
    {
        self.with(|s| s.drain(sink, max_bytes))
    }

    pub fn has_drained_all(&self) -> bool {
        self.lock().serializer.has_drained_all()
    }

    pub fn has_pending(&self) -> bool {
        self.lock().has_pending
    }

    /// Block until bytes are queued, then drain up to `max_bytes`.
    ///
    /// Returns `None` once the serializer is closed.
    pub fn wait_and_drain<S>(&self, sink: &mut S, max_bytes: usize) -> Option<usize>
    where
        S: ByteSink + ?Sized,
    {
        let mut shared = self.lock();
        while !shared.has_pending && !shared.closed {
            shared = self
                .pending
                .wait(shared)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if shared.closed {
            return None;
        }
        let n = shared.serializer.drain(sink, max_bytes);
        shared.refresh();
        Some(n)
    }

    /// Wake every waiter; later waits return `None` until [`reset`](Self::reset).
    pub fn close(&self) {
        let mut shared = self.lock();
        shared.closed = true;
        self.pending.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Drop queued bytes and reopen.
    pub fn reset(&self) {
        let mut shared = self.lock();
        shared.serializer.reset();
        shared.has_pending = false;
        shared.closed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode_variable_length, Message};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Sink that accepts at most `limit` bytes per call.
    struct Trickle {
        limit: usize,
        out: Vec<u8>,
    }

    impl ByteSink for Trickle {
        fn consume(&mut self, bytes: &[u8]) -> usize {
            let n = bytes.len().min(self.limit);
            self.out.extend_from_slice(&bytes[..n]);
            n
        }
    }

    #[test]
    fn test_append_and_drain() {
        let mut ser = ByteSerializer::new();
        ser.append(b"abcdef");
        assert_eq!(ser.populated(), 6);
        assert!(!ser.has_drained_all());

        let mut out = Vec::new();
        assert_eq!(ser.drain(&mut out, 4), 4);
        assert_eq!(ser.serialized(), 4);
        assert_eq!(ser.pending(), b"ef");

        assert_eq!(ser.drain(&mut out, 4), 2);
        assert_eq!(out, b"abcdef");
        assert!(ser.has_drained_all());
        // Logical reset after a full drain
        assert_eq!(ser.populated(), 0);
        assert_eq!(ser.serialized(), 0);
    }

    #[test]
    fn test_serialized_never_exceeds_populated() {
        let mut ser = ByteSerializer::new();
        let mut sink = Trickle { limit: 3, out: Vec::new() };
        let mut expected = Vec::new();

        for round in 0..20u8 {
            let chunk = vec![round; (round as usize % 5) + 1];
            ser.append(&chunk);
            expected.extend_from_slice(&chunk);
            assert!(ser.serialized() <= ser.populated());

            ser.drain(&mut sink, (round as usize % 4) + 1);
            assert!(ser.serialized() <= ser.populated());
        }
        while !ser.has_drained_all() {
            ser.drain(&mut sink, 1024);
        }
        assert_eq!(sink.out, expected);
    }

    #[test]
    fn test_content_after_full_drain() {
        let mut ser = ByteSerializer::new();
        ser.append(b"old");
        let mut out = Vec::new();
        ser.drain(&mut out, 1024);

        ser.append(b"new");
        assert_eq!(ser.pending(), b"new");
    }

    #[test]
    fn test_drain_nothing() {
        let mut ser = ByteSerializer::new();
        let mut out = Vec::new();
        assert_eq!(ser.drain(&mut out, 1024), 0);
        ser.append(b"x");
        assert_eq!(ser.drain(&mut out, 0), 0);
        assert!(!ser.has_drained_all());
    }

    #[test]
    fn test_append_frame() {
        let mut ser = ByteSerializer::new();
        ser.append_frame(&Message::VariableLength { text: b"hi" });
        assert_eq!(ser.pending(), encode_variable_length(b"hi").as_slice());
    }

    #[test]
    fn test_waitable_flags() {
        let ser = WaitableByteSerializer::new();
        assert!(!ser.has_pending());
        ser.append(b"abc");
        assert!(ser.has_pending());

        let mut out = Vec::new();
        assert_eq!(ser.drain(&mut out, 2), 2);
        assert!(ser.has_pending());
        assert_eq!(ser.drain(&mut out, 2), 1);
        assert!(!ser.has_pending());
        assert!(ser.has_drained_all());
    }

    #[test]
    fn test_wait_and_drain_wakes_on_append() {
        let ser = Arc::new(WaitableByteSerializer::new());
        let writer = {
            let ser = Arc::clone(&ser);
            thread::spawn(move || {
                let mut out = Vec::new();
                while out.len() < 6 {
                    if ser.wait_and_drain(&mut out, 1024).is_none() {
                        break;
                    }
                }
                out
            })
        };

        thread::sleep(Duration::from_millis(20));
        ser.append(b"abc");
        thread::sleep(Duration::from_millis(20));
        ser.append(b"def");

        assert_eq!(writer.join().unwrap(), b"abcdef");
    }

    #[test]
    fn test_close_releases_waiter() {
        let ser = Arc::new(WaitableByteSerializer::new());
        let waiter = {
            let ser = Arc::clone(&ser);
            thread::spawn(move || {
                let mut out = Vec::new();
                ser.wait_and_drain(&mut out, 1024)
            })
        };

        thread::sleep(Duration::from_millis(20));
        ser.close();
        assert_eq!(waiter.join().unwrap(), None);
        assert!(ser.is_closed());

        ser.reset();
        assert!(!ser.is_closed());
    }
}
