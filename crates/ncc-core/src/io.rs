//! Byte source/sink seams and the I/O outcome taxonomy
//!
//! The decoder pulls from a [`ByteSource`], the serializers push into a
//! [`ByteSink`]. Socket-backed implementations live in the runtime crate;
//! in-memory ones are used by tests and the benchmark.
//!
//! Every raw read or write result is summarised as an [`IoStatus`]:
//!
//! | raw result                          | status        |
//! |-------------------------------------|---------------|
//! | nothing requested                   | `WentThrough` |
//! | `> 0` bytes                         | `WentThrough` |
//! | `0` bytes for a non-empty request   | `PeerHungUp`  |
//! | `-1` with EAGAIN/EWOULDBLOCK/EINTR  | `WouldBlock`  |
//! | `-1` with anything else             | `PeerHungUp`  |

use core::fmt;
use nix::errno::Errno;

/// Something bytes can be pulled from.
pub trait ByteSource {
    /// Fill a prefix of `buf`, returning how many bytes were supplied.
    ///
    /// `0` means nothing is available right now; it is not an error.
    fn fill(&mut self, buf: &mut [u8]) -> usize;
}

/// Something bytes can be pushed into.
pub trait ByteSink {
    /// Consume a prefix of `bytes`, returning how many were taken.
    fn consume(&mut self, bytes: &[u8]) -> usize;
}

impl ByteSink for Vec<u8> {
    fn consume(&mut self, bytes: &[u8]) -> usize {
        self.extend_from_slice(bytes);
        bytes.len()
    }
}

impl ByteSource for &[u8] {
    fn fill(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.len());
        buf[..n].copy_from_slice(&self[..n]);
        *self = &self[n..];
        n
    }
}

/// Summary of one read or write attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// The descriptor is not ready; wait for the next readiness report
    WouldBlock,
    /// The call made progress (or had nothing to do)
    WentThrough,
    /// The peer closed or reset the connection
    PeerHungUp,
}

impl fmt::Display for IoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoStatus::WouldBlock => write!(f, "would-block"),
            IoStatus::WentThrough => write!(f, "went-through"),
            IoStatus::PeerHungUp => write!(f, "peer-hung-up"),
        }
    }
}

/// Raw result of the last read or write syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoRecord {
    /// Bytes requested from the syscall
    pub requested: usize,
    /// Syscall return value
    pub status: isize,
    /// errno captured when `status < 0`
    pub errno: Option<Errno>,
}

impl IoRecord {
    pub const fn new(requested: usize, status: isize, errno: Option<Errno>) -> Self {
        Self { requested, status, errno }
    }

    /// Bytes actually transferred
    #[inline]
    pub fn transferred(&self) -> usize {
        if self.status > 0 {
            self.status as usize
        } else {
            0
        }
    }

    #[inline]
    pub fn summarise(&self) -> IoStatus {
        classify(self.requested, self.status, self.errno)
    }

    /// errno as a plain integer for log lines (0 when none)
    #[inline]
    pub fn errno_code(&self) -> i32 {
        self.errno.map_or(0, |e| e as i32)
    }
}

/// Classify a raw syscall result.
pub fn classify(requested: usize, status: isize, errno: Option<Errno>) -> IoStatus {
    if requested == 0 || status > 0 {
        return IoStatus::WentThrough;
    }
    if status == 0 {
        return IoStatus::PeerHungUp;
    }
    match errno {
        // EWOULDBLOCK == EAGAIN on Linux
        Some(Errno::EAGAIN) | Some(Errno::EINTR) => IoStatus::WouldBlock,
        _ => IoStatus::PeerHungUp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_progress() {
        assert_eq!(classify(1024, 12, None), IoStatus::WentThrough);
        assert_eq!(classify(0, 0, None), IoStatus::WentThrough);
    }

    #[test]
    fn test_classify_hangup() {
        assert_eq!(classify(1024, 0, None), IoStatus::PeerHungUp);
        assert_eq!(classify(1024, -1, Some(Errno::ECONNRESET)), IoStatus::PeerHungUp);
        assert_eq!(classify(1024, -1, Some(Errno::EPIPE)), IoStatus::PeerHungUp);
    }

    #[test]
    fn test_classify_would_block() {
        assert_eq!(classify(1024, -1, Some(Errno::EAGAIN)), IoStatus::WouldBlock);
        assert_eq!(classify(1024, -1, Some(Errno::EINTR)), IoStatus::WouldBlock);
    }

    #[test]
    fn test_record_transferred() {
        let rec = IoRecord::new(1024, 300, None);
        assert_eq!(rec.transferred(), 300);
        assert_eq!(rec.summarise(), IoStatus::WentThrough);

        let rec = IoRecord::new(1024, -1, Some(Errno::EAGAIN));
        assert_eq!(rec.transferred(), 0);
        assert_eq!(rec.errno_code(), Errno::EAGAIN as i32);
    }

    #[test]
    fn test_slice_source() {
        let data = b"abcdef".to_vec();
        let mut src: &[u8] = &data;
        let mut buf = [0u8; 4];
        assert_eq!(src.fill(&mut buf), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(src.fill(&mut buf), 2);
        assert_eq!(src.fill(&mut buf), 0);
    }
}
