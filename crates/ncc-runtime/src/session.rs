//! Per-connection sessions and the session registry
//!
//! A [`Session`] slot is created the first time a descriptor is seen and is
//! never freed while the registry is open. Disconnect moves it back to
//! [`SlotState::Idle`] and clears its buffers; the next connection that gets
//! the same descriptor number reuses the slot.
//!
//! Lock order, outermost first: registry, slot state, decoder, serializer,
//! interest list.

use std::collections::BTreeMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ncc_core::benchmark::IoBenchmark;
use ncc_core::decoder::{FrameHandler, StreamFrameDecoder};
use ncc_core::frame::{encode_ack, tag_name, Header, Message, MsgType};
use ncc_core::io::{IoRecord, IoStatus};
use ncc_core::serializer::WaitableByteSerializer;
use ncc_core::{log_debug, log_info, log_warn};

use crate::socket::{SocketReader, SocketWriter};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Slot lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Active { fd: RawFd, peer: String },
}

/// Frame and ack counters for one connection
#[derive(Debug)]
pub struct SessionStats {
    frames_received: AtomicU64,
    acks_received: AtomicU64,
    acks_sent: AtomicU64,
    /// Microseconds, or -1 before the first timed Ack
    last_round_trip_us: AtomicI64,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            acks_received: AtomicU64::new(0),
            acks_sent: AtomicU64::new(0),
            last_round_trip_us: AtomicI64::new(-1),
        }
    }
}

impl SessionStats {
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn acks_received(&self) -> u64 {
        self.acks_received.load(Ordering::Relaxed)
    }

    pub fn acks_sent(&self) -> u64 {
        self.acks_sent.load(Ordering::Relaxed)
    }

    pub fn last_round_trip_us(&self) -> Option<u64> {
        let v = self.last_round_trip_us.load(Ordering::Relaxed);
        if v < 0 {
            None
        } else {
            Some(v as u64)
        }
    }

    fn reset(&self) {
        self.frames_received.store(0, Ordering::Relaxed);
        self.acks_received.store(0, Ordering::Relaxed);
        self.acks_sent.store(0, Ordering::Relaxed);
        self.last_round_trip_us.store(-1, Ordering::Relaxed);
    }
}

// ============================================================================
// Ack responder
// ============================================================================

/// Frame handler that logs each frame and acknowledges every non-Ack one.
///
/// Acks are never acknowledged, so two peers cannot ping-pong forever.
pub struct AckResponder<'a> {
    fd: RawFd,
    serializer: &'a WaitableByteSerializer,
    benchmark: &'a IoBenchmark,
    stats: &'a SessionStats,
}

impl<'a> AckResponder<'a> {
    pub fn new(
        fd: RawFd,
        serializer: &'a WaitableByteSerializer,
        benchmark: &'a IoBenchmark,
        stats: &'a SessionStats,
    ) -> Self {
        Self { fd, serializer, benchmark, stats }
    }
}

impl FrameHandler for AckResponder<'_> {
    fn on_frame(&mut self, frame: &[u8]) {
        let header = match Header::decode(frame) {
            Ok(h) => h,
            Err(e) => {
                log_warn!("{}|Dropped|{}", self.fd, e);
                return;
            }
        };
        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);

        if header.msg_type() == Some(MsgType::Ack) {
            self.stats.acks_received.fetch_add(1, Ordering::Relaxed);
            // Report the body length of the frame being acknowledged
            let acked = match Message::decode(frame) {
                Ok(Message::Ack { original }) => original.body_len(),
                _ => 0,
            };
            match self.benchmark.round_trip() {
                Some(rtt) => {
                    let us = rtt.as_micros().min(i64::MAX as u128) as i64;
                    self.stats.last_round_trip_us.store(us, Ordering::Relaxed);
                    log_info!("{}|Got Ack: rtrip={}us ({} bytes)", self.fd, us, acked);
                }
                None => log_info!("{}|Got Ack ({} bytes)", self.fd, acked),
            }
            return;
        }

        log_info!("{}|Got {} ({} bytes)", self.fd, tag_name(header.tag), header.body_len());
        if let Ok(Message::VariableLength { text }) = Message::decode(frame) {
            log_debug!("{}|Text|{}", self.fd, String::from_utf8_lossy(text));
        }
        self.serializer.append(&encode_ack(&header));
        self.stats.acks_sent.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// Session
// ============================================================================

/// State owned by one connection slot.
#[derive(Debug)]
pub struct Session {
    state: Mutex<SlotState>,
    decoder: Mutex<StreamFrameDecoder>,
    serializer: WaitableByteSerializer,
    benchmark: IoBenchmark,
    last_read: Mutex<IoRecord>,
    last_write: Mutex<IoRecord>,
    stats: SessionStats,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Idle),
            decoder: Mutex::new(StreamFrameDecoder::new()),
            serializer: WaitableByteSerializer::new(),
            benchmark: IoBenchmark::new(),
            last_read: Mutex::new(IoRecord::default()),
            last_write: Mutex::new(IoRecord::default()),
            stats: SessionStats::default(),
        }
    }

    /// Bind the slot to a live connection.
    pub fn activate(&self, fd: RawFd, peer: impl Into<String>) {
        *lock(&self.state) = SlotState::Active { fd, peer: peer.into() };
    }

    /// Mark the slot unused without clearing buffers or counters.
    ///
    /// Returns the descriptor it was bound to.
    pub fn deactivate(&self) -> Option<RawFd> {
        match std::mem::replace(&mut *lock(&self.state), SlotState::Idle) {
            SlotState::Active { fd, .. } => Some(fd),
            SlotState::Idle => None,
        }
    }

    /// Return to Idle and clear everything a new connection must not see.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        *state = SlotState::Idle;
        lock(&self.decoder).reset();
        self.serializer.reset();
        self.benchmark.reset();
        *lock(&self.last_read) = IoRecord::default();
        *lock(&self.last_write) = IoRecord::default();
        self.stats.reset();
    }

    pub fn state(&self) -> SlotState {
        lock(&self.state).clone()
    }

    pub fn fd(&self) -> Option<RawFd> {
        match &*lock(&self.state) {
            SlotState::Active { fd, .. } => Some(*fd),
            SlotState::Idle => None,
        }
    }

    pub fn peer(&self) -> Option<String> {
        match &*lock(&self.state) {
            SlotState::Active { peer, .. } => Some(peer.clone()),
            SlotState::Idle => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(*lock(&self.state), SlotState::Active { .. })
    }

    pub fn serializer(&self) -> &WaitableByteSerializer {
        &self.serializer
    }

    pub fn benchmark(&self) -> &IoBenchmark {
        &self.benchmark
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn last_read(&self) -> IoRecord {
        *lock(&self.last_read)
    }

    pub fn last_write(&self) -> IoRecord {
        *lock(&self.last_write)
    }

    /// Read up to `max_bytes` from `fd` into the decoder.
    pub fn pull(&self, fd: RawFd, max_bytes: usize) -> (usize, IoStatus) {
        let mut reader = SocketReader::new(fd, &self.benchmark);
        let n = lock(&self.decoder).append_from(&mut reader, max_bytes);
        let record = reader.record();
        *lock(&self.last_read) = record;
        if record.status < 0 {
            log_debug!(
                "{}|I|status={} errno={} e={}",
                fd,
                record.status,
                record.errno_code(),
                record.summarise()
            );
        }
        (n, record.summarise())
    }

    /// Decode buffered frames and answer them.
    pub fn handle_frames(&self, fd: RawFd) -> usize {
        let mut responder = AckResponder::new(fd, &self.serializer, &self.benchmark, &self.stats);
        lock(&self.decoder).decode(&mut responder)
    }

    /// Drain up to `max_bytes` onto `fd`, then call `after` with whether the
    /// queue is now empty. Both run under the serializer lock.
    pub fn push_then<R>(
        &self,
        fd: RawFd,
        max_bytes: usize,
        after: impl FnOnce(bool) -> R,
    ) -> (usize, IoStatus, R) {
        let mut writer = SocketWriter::new(fd, &self.benchmark);
        let (n, drained, result) = self.serializer.with(|s| {
            let n = s.drain(&mut writer, max_bytes);
            let drained = s.has_drained_all();
            (n, drained, after(drained))
        });
        let record = writer.record();
        // An empty queue never reaches the socket; keep the previous record
        if record.requested > 0 {
            *lock(&self.last_write) = record;
        }
        if record.status < 0 {
            log_debug!(
                "{}|O|status={} errno={} e={} drained={}",
                fd,
                record.status,
                record.errno_code(),
                record.summarise(),
                drained
            );
        }
        (n, record.summarise(), result)
    }

    /// Block until output is queued, then drain up to `max_bytes` onto `fd`.
    ///
    /// `None` once the serializer has been closed.
    pub fn wait_and_push(&self, fd: RawFd, max_bytes: usize) -> Option<(usize, IoStatus)> {
        let mut writer = SocketWriter::new(fd, &self.benchmark);
        let n = self.serializer.wait_and_drain(&mut writer, max_bytes)?;
        let record = writer.record();
        *lock(&self.last_write) = record;
        Some((n, record.summarise()))
    }

    /// Run `f` with the bound descriptor while holding the slot state, so
    /// the slot cannot go Idle underneath it.
    pub fn with_active_fd<R>(&self, f: impl FnOnce(RawFd) -> R) -> Option<R> {
        match &*lock(&self.state) {
            SlotState::Active { fd, .. } => Some(f(*fd)),
            SlotState::Idle => None,
        }
    }

    /// Append `bytes` if the slot is active, then call `after` with its
    /// descriptor under the serializer lock.
    pub fn enqueue_then<R>(&self, bytes: &[u8], after: impl FnOnce(RawFd) -> R) -> Option<R> {
        self.with_active_fd(|fd| {
            self.serializer.with(|s| {
                s.append(bytes);
                after(fd)
            })
        })
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Slots keyed by descriptor number.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    slots: Mutex<BTreeMap<RawFd, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the slot for `fd` to a new connection, creating it on first use.
    pub fn acquire(&self, fd: RawFd, peer: impl Into<String>) -> Arc<Session> {
        let mut slots = lock(&self.slots);
        let session = slots.entry(fd).or_insert_with(|| Arc::new(Session::new()));
        if session.is_active() {
            log_warn!("{}|Slot still active, resetting", fd);
            session.reset();
        }
        session.activate(fd, peer);
        Arc::clone(session)
    }

    /// Slot for `fd`, active or not
    pub fn get(&self, fd: RawFd) -> Option<Arc<Session>> {
        lock(&self.slots).get(&fd).cloned()
    }

    /// Slot for `fd` only if it is bound to a live connection
    pub fn get_active(&self, fd: RawFd) -> Option<Arc<Session>> {
        self.get(fd).filter(|s| s.is_active())
    }

    /// Reset the slot for `fd` to Idle. The slot itself is kept.
    pub fn release(&self, fd: RawFd) -> Option<Arc<Session>> {
        let session = self.get(fd)?;
        session.reset();
        Some(session)
    }

    /// Visit every active slot with the registry locked.
    pub fn for_each_active(&self, mut f: impl FnMut(RawFd, &Session)) {
        let slots = lock(&self.slots);
        for (&fd, session) in slots.iter() {
            if session.is_active() {
                f(fd, session);
            }
        }
    }

    /// Slots ever created
    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.slots).is_empty()
    }

    pub fn active_count(&self) -> usize {
        lock(&self.slots).values().filter(|s| s.is_active()).count()
    }

    /// Destroy every slot.
    pub fn clear(&self) {
        lock(&self.slots).clear();
    }
}
