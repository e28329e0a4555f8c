//! Readiness multiplexer and interest-list bookkeeping
//!
//! [`InterestListController`] owns a [`Multiplexer`] and remembers the mask
//! last registered for every watched descriptor. Modifications are expressed
//! as bits to add and bits to remove; when the recorded mask already
//! satisfies both, no syscall is made.
//!
//! The recorded mask only changes after the multiplexer accepted the update.
//! Interest must be removed before the descriptor is closed.
//!
//! ```ignore
//! let ctl = InterestListController::open()?;
//! ctl.add(fd, Interest::IN | Interest::RDHUP | Interest::HUP)?;
//! ctl.modify(fd, Interest::OUT, Interest::NONE)?;   // arm write
//! ctl.modify(fd, Interest::OUT, Interest::NONE)?;   // no syscall
//! ctl.remove(fd)?;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Sub};
use std::os::unix::io::RawFd;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ncc_core::log_debug;
use nix::errno::Errno;

use crate::error::InterestError;

// ============================================================================
// Interest mask
// ============================================================================

/// A set of epoll readiness bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interest(u32);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const IN: Interest = Interest(libc::EPOLLIN as u32);
    pub const PRI: Interest = Interest(libc::EPOLLPRI as u32);
    pub const OUT: Interest = Interest(libc::EPOLLOUT as u32);
    pub const ERR: Interest = Interest(libc::EPOLLERR as u32);
    pub const HUP: Interest = Interest(libc::EPOLLHUP as u32);
    pub const RDHUP: Interest = Interest(libc::EPOLLRDHUP as u32);

    /// Bits that mean the connection is going away
    pub const HANGUP: Interest = Interest(Self::RDHUP.0 | Self::HUP.0 | Self::ERR.0);

    /// Bits the reactor knows how to act on
    pub const HANDLED: Interest = Interest(Self::IN.0 | Self::OUT.0 | Self::HANGUP.0);

    const NAMES: &'static [(u32, &'static str)] = &[
        (libc::EPOLLIN as u32, "IN"),
        (libc::EPOLLPRI as u32, "PRI"),
        (libc::EPOLLOUT as u32, "OUT"),
        (libc::EPOLLRDNORM as u32, "RDNORM"),
        (libc::EPOLLRDBAND as u32, "RDBAND"),
        (libc::EPOLLWRNORM as u32, "WRNORM"),
        (libc::EPOLLWRBAND as u32, "WRBAND"),
        (libc::EPOLLMSG as u32, "MSG"),
        (libc::EPOLLERR as u32, "ERR"),
        (libc::EPOLLHUP as u32, "HUP"),
        (libc::EPOLLRDHUP as u32, "RDHUP"),
        (libc::EPOLLEXCLUSIVE as u32, "EXCLUSIVE"),
        (libc::EPOLLWAKEUP as u32, "WAKEUP"),
        (libc::EPOLLONESHOT as u32, "ONESHOT"),
        (libc::EPOLLET as u32, "ET"),
    ];

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Interest(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// All bits of `other` are set
    #[inline]
    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    /// Any bit of `other` is set
    #[inline]
    pub const fn intersects(self, other: Interest) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for Interest {
    type Output = Interest;
    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Interest {
    type Output = Interest;
    fn bitand(self, rhs: Interest) -> Interest {
        Interest(self.0 & rhs.0)
    }
}

/// Set difference
impl Sub for Interest {
    type Output = Interest;
    fn sub(self, rhs: Interest) -> Interest {
        Interest(self.0 & !rhs.0)
    }
}

impl fmt::Display for Interest {
    /// Space-separated bit names; leftover bits in hex.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "NONE");
        }
        let mut rest = self.0;
        let mut first = true;
        for &(bit, name) in Self::NAMES {
            if rest & bit != 0 {
                if !first {
                    f.write_str(" ")?;
                }
                f.write_str(name)?;
                rest &= !bit;
                first = false;
            }
        }
        if rest != 0 {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{:#x}", rest)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Interest({})", self)
    }
}

/// One readiness report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    pub fd: RawFd,
    pub readiness: Interest,
}

// ============================================================================
// Multiplexer seam
// ============================================================================

/// The OS readiness facility.
///
/// Implementations are level-triggered. `wait` must report a signal
/// interruption as `Errno::EINTR`.
pub trait Multiplexer: Send + Sync {
    fn add(&self, fd: RawFd, interest: Interest) -> Result<(), Errno>;
    fn modify(&self, fd: RawFd, interest: Interest) -> Result<(), Errno>;
    fn delete(&self, fd: RawFd) -> Result<(), Errno>;

    /// Replace `out` with up to `max_events` ready descriptors.
    ///
    /// `None` blocks indefinitely.
    fn wait(
        &self,
        out: &mut Vec<ReadyEvent>,
        max_events: usize,
        timeout: Option<Duration>,
    ) -> Result<usize, Errno>;
}

/// Level-triggered epoll instance.
pub struct Epoll {
    fd: RawFd,
    /// Raw event buffer reused across waits
    scratch: Mutex<Vec<libc::epoll_event>>,
}

impl Epoll {
    pub fn new() -> Result<Self, Errno> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(Errno::last());
        }
        Ok(Self {
            fd,
            scratch: Mutex::new(Vec::new()),
        })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: Interest) -> Result<(), Errno> {
        let mut event = libc::epoll_event {
            events: interest.bits(),
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.fd, op, fd, &mut event) };
        if ret < 0 {
            return Err(Errno::last());
        }
        Ok(())
    }
}

impl Multiplexer for Epoll {
    fn add(&self, fd: RawFd, interest: Interest) -> Result<(), Errno> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, interest)
    }

    fn modify(&self, fd: RawFd, interest: Interest) -> Result<(), Errno> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, interest)
    }

    fn delete(&self, fd: RawFd) -> Result<(), Errno> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, Interest::NONE)
    }

    fn wait(
        &self,
        out: &mut Vec<ReadyEvent>,
        max_events: usize,
        timeout: Option<Duration>,
    ) -> Result<usize, Errno> {
        let max_events = max_events.clamp(1, libc::c_int::MAX as usize);
        let timeout_ms = match timeout {
            None => -1,
            Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        };

        let mut scratch = self.scratch.lock().unwrap_or_else(PoisonError::into_inner);
        scratch.clear();
        scratch.resize(max_events, libc::epoll_event { events: 0, u64: 0 });

        let n = unsafe {
            libc::epoll_wait(
                self.fd,
                scratch.as_mut_ptr(),
                max_events as libc::c_int,
                timeout_ms,
            )
        };
        if n < 0 {
            return Err(Errno::last());
        }

        out.clear();
        out.extend(scratch[..n as usize].iter().map(|e| {
            // Copy out of the packed struct before use
            let events = e.events;
            let data = e.u64;
            ReadyEvent {
                fd: data as RawFd,
                readiness: Interest::from_bits(events),
            }
        }));
        Ok(n as usize)
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
            self.fd = -1;
        }
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Interest list with a per-descriptor record of the registered mask.
///
/// Mutations are serialized by one lock. `wait` does not take it, so other
/// threads can arm interest while the reactor sleeps.
pub struct InterestListController<M: Multiplexer = Epoll> {
    mux: M,
    watched: Mutex<BTreeMap<RawFd, Interest>>,
}

impl InterestListController<Epoll> {
    /// Controller over a fresh epoll instance.
    pub fn open() -> Result<Self, InterestError> {
        Ok(Self::new(Epoll::new().map_err(InterestError::Os)?))
    }
}

impl<M: Multiplexer> InterestListController<M> {
    pub fn new(mux: M) -> Self {
        Self {
            mux,
            watched: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<RawFd, Interest>> {
        self.watched.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn multiplexer(&self) -> &M {
        &self.mux
    }

    /// Start watching `fd`.
    pub fn add(&self, fd: RawFd, interest: Interest) -> Result<(), InterestError> {
        let mut watched = self.lock();
        if watched.contains_key(&fd) {
            return Err(InterestError::AlreadyWatched(fd));
        }
        self.mux.add(fd, interest).map_err(InterestError::Os)?;
        watched.insert(fd, interest);
        log_debug!("{}|+|{}", fd, interest);
        Ok(())
    }

    /// Set the bits in `add` and clear the bits in `remove`.
    ///
    /// No syscall is made when the recorded mask already has every bit of
    /// `add` and none of `remove`.
    pub fn modify(&self, fd: RawFd, add: Interest, remove: Interest) -> Result<(), InterestError> {
        let mut watched = self.lock();
        let existing = *watched.get(&fd).ok_or(InterestError::NotFound(fd))?;
        if existing.contains(add) && !existing.intersects(remove) {
            return Ok(());
        }
        let updated = (existing | add) - remove;
        self.mux.modify(fd, updated).map_err(InterestError::Os)?;
        watched.insert(fd, updated);
        log_debug!("{}|~|{}", fd, updated);
        Ok(())
    }

    /// Stop watching `fd`. Call before closing it.
    ///
    /// Unlike [`add`](Self::add) and [`modify`](Self::modify), the record is
    /// dropped even if the kernel call fails, so it no longer mirrors the
    /// kernel's registration in that case. The error is still returned. A
    /// failing delete means the descriptor is already gone from the kernel
    /// set (`EBADF`, `ENOENT`), and the caller closes it next.
    pub fn remove(&self, fd: RawFd) -> Result<(), InterestError> {
        let mut watched = self.lock();
        if watched.remove(&fd).is_none() {
            return Err(InterestError::NotFound(fd));
        }
        log_debug!("{}|-", fd);
        self.mux.delete(fd).map_err(InterestError::Os)
    }

    /// Wait for readiness. A signal interruption is reported as
    /// [`InterestError::Interrupted`].
    pub fn wait(
        &self,
        out: &mut Vec<ReadyEvent>,
        max_events: usize,
        timeout: Option<Duration>,
    ) -> Result<usize, InterestError> {
        match self.mux.wait(out, max_events, timeout) {
            Ok(n) => Ok(n),
            Err(Errno::EINTR) => {
                out.clear();
                Err(InterestError::Interrupted)
            }
            Err(e) => {
                out.clear();
                Err(InterestError::Os(e))
            }
        }
    }

    /// Mask last registered for `fd`
    pub fn interest_of(&self, fd: RawFd) -> Option<Interest> {
        self.lock().get(&fd).copied()
    }

    pub fn is_watched(&self, fd: RawFd) -> bool {
        self.lock().contains_key(&fd)
    }

    /// Snapshot of watched descriptors
    pub fn watched(&self) -> Vec<RawFd> {
        self.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counts calls; optionally fails them.
    #[derive(Default)]
    pub(crate) struct CountingMux {
        pub(crate) adds: AtomicUsize,
        pub(crate) modifies: AtomicUsize,
        pub(crate) deletes: AtomicUsize,
        pub(crate) fail: AtomicBool,
    }

    impl CountingMux {
        pub(crate) fn calls(&self) -> usize {
            self.adds.load(Ordering::SeqCst)
                + self.modifies.load(Ordering::SeqCst)
                + self.deletes.load(Ordering::SeqCst)
        }

        fn outcome(&self) -> Result<(), Errno> {
            if self.fail.load(Ordering::SeqCst) {
                Err(Errno::EBADF)
            } else {
                Ok(())
            }
        }
    }

    impl Multiplexer for CountingMux {
        fn add(&self, _fd: RawFd, _interest: Interest) -> Result<(), Errno> {
            self.adds.fetch_add(1, Ordering::SeqCst);
            self.outcome()
        }

        fn modify(&self, _fd: RawFd, _interest: Interest) -> Result<(), Errno> {
            self.modifies.fetch_add(1, Ordering::SeqCst);
            self.outcome()
        }

        fn delete(&self, _fd: RawFd) -> Result<(), Errno> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.outcome()
        }

        fn wait(
            &self,
            out: &mut Vec<ReadyEvent>,
            _max_events: usize,
            _timeout: Option<Duration>,
        ) -> Result<usize, Errno> {
            out.clear();
            if self.fail.load(Ordering::SeqCst) {
                return Err(Errno::EINTR);
            }
            Ok(0)
        }
    }

    const READ: Interest = Interest::from_bits(
        Interest::IN.bits() | Interest::RDHUP.bits() | Interest::HUP.bits(),
    );

    #[test]
    fn test_add_records_mask() {
        let ctl = InterestListController::new(CountingMux::default());
        ctl.add(5, READ).unwrap();
        assert_eq!(ctl.interest_of(5), Some(READ));
        assert_eq!(ctl.len(), 1);
        assert_eq!(ctl.add(5, READ), Err(InterestError::AlreadyWatched(5)));
    }

    #[test]
    fn test_failed_add_not_recorded() {
        let ctl = InterestListController::new(CountingMux::default());
        ctl.multiplexer().fail.store(true, Ordering::SeqCst);
        assert_eq!(ctl.add(5, READ), Err(InterestError::Os(Errno::EBADF)));
        assert!(ctl.is_empty());
    }

    #[test]
    fn test_modify_short_circuit() {
        let ctl = InterestListController::new(CountingMux::default());
        ctl.add(5, READ).unwrap();
        let before = ctl.multiplexer().calls();

        // Already present / already absent: no syscall
        ctl.modify(5, Interest::IN, Interest::OUT).unwrap();
        ctl.modify(5, Interest::NONE, Interest::NONE).unwrap();
        assert_eq!(ctl.multiplexer().calls(), before);

        ctl.modify(5, Interest::OUT, Interest::NONE).unwrap();
        assert_eq!(ctl.interest_of(5), Some(READ | Interest::OUT));
        assert_eq!(ctl.multiplexer().modifies.load(Ordering::SeqCst), 1);

        // Arming again is free
        ctl.modify(5, Interest::OUT, Interest::NONE).unwrap();
        assert_eq!(ctl.multiplexer().modifies.load(Ordering::SeqCst), 1);

        ctl.modify(5, Interest::NONE, Interest::OUT).unwrap();
        assert_eq!(ctl.interest_of(5), Some(READ));
        assert_eq!(ctl.multiplexer().modifies.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_modify_keeps_mask() {
        let ctl = InterestListController::new(CountingMux::default());
        ctl.add(5, READ).unwrap();
        ctl.multiplexer().fail.store(true, Ordering::SeqCst);
        assert!(ctl.modify(5, Interest::OUT, Interest::NONE).is_err());
        assert_eq!(ctl.interest_of(5), Some(READ));
    }

    #[test]
    fn test_modify_unknown_fd() {
        let ctl = InterestListController::new(CountingMux::default());
        assert_eq!(
            ctl.modify(9, Interest::OUT, Interest::NONE),
            Err(InterestError::NotFound(9))
        );
        assert_eq!(ctl.multiplexer().calls(), 0);
    }

    #[test]
    fn test_remove() {
        let ctl = InterestListController::new(CountingMux::default());
        ctl.add(5, READ).unwrap();
        ctl.add(6, READ).unwrap();
        ctl.remove(5).unwrap();
        assert_eq!(ctl.watched(), vec![6]);
        assert_eq!(ctl.remove(5), Err(InterestError::NotFound(5)));
    }

    #[test]
    fn test_failed_remove_still_forgets() {
        let ctl = InterestListController::new(CountingMux::default());
        ctl.add(5, READ).unwrap();
        ctl.multiplexer().fail.store(true, Ordering::SeqCst);
        assert_eq!(ctl.remove(5), Err(InterestError::Os(Errno::EBADF)));
        assert!(!ctl.is_watched(5));
        assert_eq!(ctl.multiplexer().deletes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wait_interrupted() {
        let ctl = InterestListController::new(CountingMux::default());
        let mut out = vec![ReadyEvent { fd: 1, readiness: Interest::IN }];
        ctl.multiplexer().fail.store(true, Ordering::SeqCst);
        assert_eq!(ctl.wait(&mut out, 16, None), Err(InterestError::Interrupted));
        assert!(out.is_empty());
    }

    #[test]
    fn test_interest_display() {
        assert_eq!(Interest::NONE.to_string(), "NONE");
        assert_eq!(READ.to_string(), "IN HUP RDHUP");
        assert_eq!((Interest::IN | Interest::OUT).to_string(), "IN OUT");
        assert_eq!(Interest::from_bits(1 << 20).to_string(), "0x100000");
        assert_eq!(
            (Interest::ERR | Interest::from_bits(1 << 20)).to_string(),
            "ERR 0x100000"
        );
    }

    #[test]
    fn test_interest_set_ops() {
        let m = Interest::IN | Interest::OUT;
        assert!(m.contains(Interest::IN));
        assert!(!m.contains(Interest::IN | Interest::HUP));
        assert!(m.intersects(Interest::OUT | Interest::HUP));
        assert_eq!(m - Interest::OUT, Interest::IN);
        assert!((Interest::HUP & Interest::HANGUP) == Interest::HUP);
    }

    #[test]
    fn test_epoll_pipe_readiness() {
        let ctl = InterestListController::open().unwrap();
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (rd, wr) = (fds[0], fds[1]);

        ctl.add(rd, Interest::IN).unwrap();
        let mut out = Vec::new();
        assert_eq!(ctl.wait(&mut out, 8, Some(Duration::from_millis(0))).unwrap(), 0);

        assert_eq!(unsafe { libc::write(wr, b"x".as_ptr() as *const libc::c_void, 1) }, 1);
        assert_eq!(ctl.wait(&mut out, 8, Some(Duration::from_millis(100))).unwrap(), 1);
        assert_eq!(out[0].fd, rd);
        assert!(out[0].readiness.contains(Interest::IN));

        ctl.remove(rd).unwrap();
        unsafe {
            libc::close(rd);
            libc::close(wr);
        }
    }
}
