//! Single-threaded reactor server
//!
//! One thread owns every socket. Each wakeup of the multiplexer yields a
//! batch of ready events which is scanned repeatedly:
//!
//! ```text
//!   wait ──► [ev0, ev1, ev2, ...]
//!              │
//!              ├─ listener  → accept one, watch IN|RDHUP|HUP
//!              ├─ waker     → shutdown requested? drop every watch
//!              └─ session   → IN:  read ≤ threshold, decode, ack, flush
//!                             OUT: flush ≤ threshold
//!                             RDHUP|HUP|ERR: hang up
//!
//!   an event that made progress keeps its slot for another pass;
//!   the scan repeats until every slot is consumed
//! ```
//!
//! After every read or write attempt write interest is armed if output is
//! still queued and dropped once it has drained. The loop ends when nothing
//! is watched any more.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ncc_core::frame::encode_variable_length;
use ncc_core::io::IoStatus;
use ncc_core::log::LogLevel;
use ncc_core::{log_debug, log_errno, log_error, log_info, log_trace, log_warn};
use nix::errno::Errno;

use crate::config::ServerConfig;
use crate::error::{InterestError, NetError, NetResult};
use crate::interest::{Interest, InterestListController, Multiplexer, ReadyEvent};
use crate::session::{Session, SessionRegistry};
use crate::socket;
use crate::waker::EventFdWaker;

/// Interest registered for every accepted connection
const SESSION_INTEREST: Interest = Interest::from_bits(
    Interest::IN.bits() | Interest::RDHUP.bits() | Interest::HUP.bits(),
);

/// Arm write interest while output is queued, drop it once drained.
pub(crate) fn rearm<M: Multiplexer>(interest: &InterestListController<M>, fd: RawFd, drained: bool) {
    let result = if drained {
        interest.modify(fd, Interest::NONE, Interest::OUT)
    } else {
        interest.modify(fd, Interest::OUT, Interest::NONE)
    };
    if let Err(e) = result {
        let verb = if drained { "drop" } else { "arm" };
        log_error!("{}|Failed to {} write interest: {}", fd, verb, e);
    }
}

/// Flush up to `max_bytes` of the session's output onto `fd`, then rearm
/// write interest under the same serializer lock.
///
/// Returns bytes written, the write outcome, and whether the queue drained.
pub fn send_pending_then_rearm<M: Multiplexer>(
    fd: RawFd,
    session: &Session,
    interest: &InterestListController<M>,
    max_bytes: usize,
) -> (usize, IoStatus, bool) {
    session.push_then(fd, max_bytes, |drained| {
        rearm(interest, fd, drained);
        drained
    })
}

/// Result of one read or write attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    /// Nothing more to do until the next wakeup
    Done,
    /// Progress was made; try again in this wakeup
    Again,
    HungUp,
}

/// The reactor. Build with [`Server::bind`], drive with [`Server::run`].
pub struct Server {
    config: ServerConfig,
    listener: RawFd,
    interest: Arc<InterestListController>,
    registry: Arc<SessionRegistry>,
    waker: Arc<EventFdWaker>,
    stopping: Arc<AtomicBool>,
}

impl Server {
    /// Listen on the configured port and watch the listener.
    pub fn bind(config: ServerConfig) -> NetResult<Server> {
        config.validate()?;
        let interest = InterestListController::open()?;
        let waker = EventFdWaker::create().map_err(|errno| NetError::Socket { op: "eventfd", errno })?;
        let listener = socket::listen(config.listening_port, config.listening_backlog)?;

        let watched = interest
            .add(listener, Interest::IN)
            .and_then(|_| interest.add(waker.fd(), Interest::IN));
        if let Err(e) = watched {
            let _ = interest.remove(listener);
            let _ = socket::close(listener);
            return Err(e.into());
        }

        let port = socket::local_port(listener).unwrap_or(config.listening_port);
        log_info!("{}|Listening|port {} backlog {}", listener, port, config.listening_backlog);

        Ok(Server {
            config,
            listener,
            interest: Arc::new(interest),
            registry: Arc::new(SessionRegistry::new()),
            waker: Arc::new(waker),
            stopping: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Port actually bound (useful after binding port 0)
    pub fn local_port(&self) -> NetResult<u16> {
        socket::local_port(self.listener).map_err(|errno| NetError::Socket { op: "getsockname", errno })
    }

    /// Handle for other threads: broadcast and shutdown.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            interest: Arc::clone(&self.interest),
            registry: Arc::clone(&self.registry),
            waker: Arc::clone(&self.waker),
            stopping: Arc::clone(&self.stopping),
        }
    }

    /// Run until nothing is watched, then close every descriptor.
    pub fn run(mut self) -> NetResult<()> {
        let max_events = self.config.max_events;
        let mut ready = Vec::with_capacity(max_events);
        let mut slots: Vec<Option<ReadyEvent>> = Vec::with_capacity(max_events);

        while !self.interest.is_empty() {
            match self.interest.wait(&mut ready, max_events, None) {
                Ok(_) => {}
                Err(InterestError::Interrupted) => {
                    log_warn!("{}|Wait interrupted, retrying", self.listener);
                    continue;
                }
                Err(e) => {
                    log_error!("{}|Wait failed: {}", self.listener, e);
                    self.close_all();
                    return Err(e.into());
                }
            }

            slots.clear();
            slots.extend(ready.drain(..).map(Some));
            self.dispatch(&mut slots);
        }

        self.close_all();
        Ok(())
    }

    /// Scan the batch until every slot is consumed.
    fn dispatch(&self, slots: &mut [Option<ReadyEvent>]) {
        let mut pass = 0usize;
        loop {
            let mut pending = false;
            for slot in slots.iter_mut() {
                let Some(event) = *slot else { continue };
                if self.handle_event(event) {
                    pending = true;
                } else {
                    *slot = None;
                }
            }
            if !pending {
                break;
            }
            pass += 1;
            log_trace!("Extra pass {}", pass);
        }
    }

    /// Returns `true` if the descriptor deserves another pass.
    fn handle_event(&self, event: ReadyEvent) -> bool {
        let ReadyEvent { fd, readiness } = event;

        if fd == self.listener {
            self.accept_one();
            return false;
        }
        if fd == self.waker.fd() {
            self.on_wake();
            return false;
        }
        if !self.interest.is_watched(fd) {
            // Dropped earlier in this wakeup
            return false;
        }

        log_debug!("{}|E|{}", fd, readiness);
        let unknown = readiness - Interest::HANDLED;
        if !unknown.is_empty() {
            log_error!("{}|E|Unexpected events {}", fd, unknown);
        }

        let Some(session) = self.registry.get_active(fd) else {
            log_error!("{}|E|No active session", fd);
            let _ = self.interest.remove(fd);
            if let Err(errno) = socket::close(fd) {
                log_errno!(LogLevel::Error, errno, "{}|Failed to close", fd);
            }
            return false;
        };

        let mut hung_up = readiness.intersects(Interest::HANGUP);
        let mut again = false;

        if readiness.contains(Interest::IN) {
            match self.on_readable(fd, &session) {
                Turn::Again => again = true,
                Turn::HungUp => hung_up = true,
                Turn::Done => {}
            }
        }
        if !hung_up && readiness.contains(Interest::OUT) {
            match self.flush(fd, &session) {
                Turn::Again => again = true,
                Turn::HungUp => hung_up = true,
                Turn::Done => {}
            }
        }

        if hung_up {
            self.hang_up(fd, &session, readiness);
            return false;
        }
        again
    }

    fn accept_one(&self) {
        let (fd, peer) = match socket::accept(self.listener) {
            Ok(conn) => conn,
            Err(Errno::EAGAIN) | Err(Errno::EINTR) | Err(Errno::ECONNABORTED) => return,
            Err(errno) => {
                log_errno!(LogLevel::Error, errno, "{}|Failed to accept", self.listener);
                return;
            }
        };

        if let Err(errno) = socket::set_nonblocking(fd) {
            log_errno!(LogLevel::Error, errno, "{}|Failed to set non-blocking", fd);
            let _ = socket::close(fd);
            return;
        }

        let peer = peer.to_string();
        self.registry.acquire(fd, peer.as_str());
        if let Err(e) = self.interest.add(fd, SESSION_INTEREST) {
            log_error!("{}|Failed to watch {}: {}", fd, peer, e);
            self.registry.release(fd);
            let _ = socket::close(fd);
            return;
        }
        log_info!("{}|Accepted|{}", fd, peer);
    }

    fn on_readable(&self, fd: RawFd, session: &Session) -> Turn {
        let (n, status) = session.pull(fd, self.config.read_threshold);
        let frames = session.handle_frames(fd);
        log_trace!("{}|R|{} bytes {} frames {}", fd, n, frames, status);

        if status == IoStatus::PeerHungUp {
            return Turn::HungUp;
        }
        if self.flush(fd, session) == Turn::HungUp {
            return Turn::HungUp;
        }
        if status == IoStatus::WentThrough && n > 0 {
            Turn::Again
        } else {
            Turn::Done
        }
    }

    fn flush(&self, fd: RawFd, session: &Session) -> Turn {
        let (n, status, drained) =
            send_pending_then_rearm(fd, session, &self.interest, self.config.write_threshold);
        match status {
            IoStatus::PeerHungUp => Turn::HungUp,
            IoStatus::WentThrough if n > 0 && !drained => Turn::Again,
            _ => Turn::Done,
        }
    }

    /// Stop watching, reset the slot, then close. The slot is Idle before
    /// the descriptor number can be handed out again.
    fn hang_up(&self, fd: RawFd, session: &Session, readiness: Interest) {
        log_info!("{}|Hangup|{} ({})", fd, session.peer().unwrap_or_default(), readiness);
        match self.interest.remove(fd) {
            Ok(()) | Err(InterestError::NotFound(_)) => {}
            Err(e) => log_error!("{}|Failed to remove interest: {}", fd, e),
        }
        self.registry.release(fd);
        if let Err(errno) = socket::close(fd) {
            log_errno!(LogLevel::Error, errno, "{}|Failed to close peer", fd);
        }
    }

    fn on_wake(&self) {
        self.waker.drain();
        if !self.stopping.load(Ordering::Acquire) {
            return;
        }
        log_info!("{}|Shutdown requested", self.listener);
        for fd in self.interest.watched() {
            if let Err(e) = self.interest.remove(fd) {
                log_error!("{}|Failed to remove interest: {}", fd, e);
            }
        }
    }

    fn close_all(&mut self) {
        if self.listener < 0 {
            return;
        }
        let _ = self.interest.remove(self.listener);
        let _ = self.interest.remove(self.waker.fd());
        if let Err(errno) = socket::close(self.listener) {
            log_errno!(LogLevel::Error, errno, "{}|Failed to close listener", self.listener);
        }

        let total = self.registry.active_count();
        let mut closed = 0;
        self.registry.for_each_active(|fd, _| {
            let _ = self.interest.remove(fd);
            match socket::close(fd) {
                Ok(()) => closed += 1,
                Err(errno) => log_errno!(LogLevel::Error, errno, "{}|Failed to close peer", fd),
            }
        });
        log_info!("{}|Closed {}/{}", self.listener, closed, total);

        self.registry.clear();
        self.listener = -1;
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Cross-thread handle to a running [`Server`].
#[derive(Clone)]
pub struct ServerHandle {
    interest: Arc<InterestListController>,
    registry: Arc<SessionRegistry>,
    waker: Arc<EventFdWaker>,
    stopping: Arc<AtomicBool>,
}

impl ServerHandle {
    /// Queue `text` as a VariableLength frame to every active session.
    ///
    /// Returns how many sessions it was queued for.
    pub fn broadcast(&self, text: &[u8]) -> usize {
        let frame = encode_variable_length(text);
        let mut count = 0;
        self.registry.for_each_active(|_, session| {
            let queued = session.enqueue_then(&frame, |fd| rearm(&self.interest, fd, false));
            if queued.is_some() {
                count += 1;
            }
        });
        log_debug!("Broadcast {} bytes to {} sessions", text.len(), count);
        count
    }

    /// Ask the reactor to drop every watch and exit its loop.
    pub fn shutdown(&self) -> NetResult<()> {
        self.stopping.store(true, Ordering::Release);
        self.waker
            .wake()
            .map_err(|errno| NetError::Socket { op: "eventfd write", errno })
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Number of watched descriptors, listener and waker included
    pub fn watched(&self) -> usize {
        self.interest.len()
    }

    pub fn is_watched(&self, fd: RawFd) -> bool {
        self.interest.is_watched(fd)
    }

    pub fn interest_of(&self, fd: RawFd) -> Option<Interest> {
        self.interest.interest_of(fd)
    }
}
