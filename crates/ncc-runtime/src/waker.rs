//! Reactor wakeup over eventfd
//!
//! The reactor watches the eventfd for readability. Multiple `wake()` calls
//! before the reactor drains the counter coalesce into a single wakeup.

use std::os::unix::io::RawFd;

use nix::errno::Errno;

pub struct EventFdWaker {
    fd: RawFd,
}

impl EventFdWaker {
    /// Create a non-blocking eventfd. The waker owns it and closes it on drop.
    pub fn create() -> Result<Self, Errno> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(Errno::last());
        }
        Ok(Self { fd })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn wake(&self) -> Result<(), Errno> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            // EAGAIN: counter saturated, a wakeup is already pending
            return match Errno::last() {
                Errno::EAGAIN => Ok(()),
                e => Err(e),
            };
        }
        Ok(())
    }

    /// Reset the counter. Returns how many wakes were coalesced.
    pub fn drain(&self) -> u64 {
        let mut val: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.fd,
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            0
        } else {
            val
        }
    }
}

impl Drop for EventFdWaker {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
            self.fd = -1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wake_coalesces() {
        let waker = EventFdWaker::create().unwrap();
        assert_eq!(waker.drain(), 0);
        waker.wake().unwrap();
        waker.wake().unwrap();
        assert_eq!(waker.drain(), 2);
        assert_eq!(waker.drain(), 0);
    }
}
