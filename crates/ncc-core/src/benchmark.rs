//! Per-connection I/O timestamps
//!
//! Socket readers and writers stamp the clock just before and just after each
//! syscall. The ack responder uses the last completed write to report round
//! trip latency when the matching Ack arrives.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Default, Clone, Copy)]
struct Stamps {
    pre_in: Option<Instant>,
    post_in: Option<Instant>,
    pre_out: Option<Instant>,
    post_out: Option<Instant>,
}

/// Thread-safe pre/post timestamps for both directions.
#[derive(Debug, Default)]
pub struct IoBenchmark {
    stamps: Mutex<Stamps>,
}

impl IoBenchmark {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Stamps> {
        self.stamps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stamp the start of a transfer.
    pub fn mark_pre(&self, dir: Direction) {
        let now = Instant::now();
        let mut s = self.lock();
        match dir {
            Direction::In => s.pre_in = Some(now),
            Direction::Out => s.pre_out = Some(now),
        }
    }

    /// Stamp the end of a transfer.
    pub fn mark_post(&self, dir: Direction) {
        let now = Instant::now();
        let mut s = self.lock();
        match dir {
            Direction::In => s.post_in = Some(now),
            Direction::Out => s.post_out = Some(now),
        }
    }

    pub fn last_pre(&self, dir: Direction) -> Option<Instant> {
        let s = self.lock();
        match dir {
            Direction::In => s.pre_in,
            Direction::Out => s.pre_out,
        }
    }

    pub fn last_post(&self, dir: Direction) -> Option<Instant> {
        let s = self.lock();
        match dir {
            Direction::In => s.post_in,
            Direction::Out => s.post_out,
        }
    }

    /// Time elapsed since the last completed outbound transfer.
    pub fn round_trip(&self) -> Option<Duration> {
        self.last_post(Direction::Out).map(|t| t.elapsed())
    }

    pub fn reset(&self) {
        *self.lock() = Stamps::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_round_trip_before_write() {
        let b = IoBenchmark::new();
        assert!(b.round_trip().is_none());
        b.mark_pre(Direction::In);
        b.mark_post(Direction::In);
        assert!(b.round_trip().is_none());
    }

    #[test]
    fn test_round_trip_after_write() {
        let b = IoBenchmark::new();
        b.mark_pre(Direction::Out);
        b.mark_post(Direction::Out);
        std::thread::sleep(Duration::from_millis(2));

        let rtt = b.round_trip().unwrap();
        assert!(rtt >= Duration::from_millis(2));
        assert!(b.last_pre(Direction::Out).unwrap() <= b.last_post(Direction::Out).unwrap());
    }

    #[test]
    fn test_reset() {
        let b = IoBenchmark::new();
        b.mark_post(Direction::Out);
        b.reset();
        assert!(b.last_post(Direction::Out).is_none());
    }
}
