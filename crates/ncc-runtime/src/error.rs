//! Error types for the runtime

use std::fmt;
use std::os::unix::io::RawFd;

use nix::errno::Errno;

use crate::config::ConfigError;

/// Interest-list failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterestError {
    /// Descriptor is not in the interest list
    NotFound(RawFd),
    /// Descriptor is already in the interest list
    AlreadyWatched(RawFd),
    /// The multiplexer call failed
    Os(Errno),
    /// The wait was interrupted by a signal; retry
    Interrupted,
}

impl fmt::Display for InterestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(fd) => write!(f, "fd {} not in interest list", fd),
            Self::AlreadyWatched(fd) => write!(f, "fd {} already in interest list", fd),
            Self::Os(e) => write!(f, "errno({}): {}", *e as i32, e.desc()),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl std::error::Error for InterestError {}

/// Runtime errors surfaced to callers
#[derive(Debug)]
pub enum NetError {
    Interest(InterestError),
    /// A socket syscall failed
    Socket { op: &'static str, errno: Errno },
    /// Host name did not resolve to an IPv4 address
    Resolve(String),
    Config(ConfigError),
    /// A worker thread could not be started
    Thread(std::io::Error),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interest(e) => write!(f, "interest list: {}", e),
            Self::Socket { op, errno } => {
                write!(f, "{} failed: errno({}): {}", op, *errno as i32, errno.desc())
            }
            Self::Resolve(host) => write!(f, "cannot resolve {}", host),
            Self::Config(e) => write!(f, "{}", e),
            Self::Thread(e) => write!(f, "thread spawn failed: {}", e),
        }
    }
}

impl std::error::Error for NetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Interest(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Thread(e) => Some(e),
            _ => None,
        }
    }
}

impl From<InterestError> for NetError {
    fn from(e: InterestError) -> Self {
        Self::Interest(e)
    }
}

impl From<ConfigError> for NetError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

pub type NetResult<T> = std::result::Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            InterestError::NotFound(7).to_string(),
            "fd 7 not in interest list"
        );
        let e = NetError::Socket { op: "bind", errno: Errno::EADDRINUSE };
        assert!(e.to_string().starts_with("bind failed: errno(98): "));
        assert_eq!(NetError::Resolve("nowhere".into()).to_string(), "cannot resolve nowhere");
    }

    #[test]
    fn test_from_interest() {
        let e: NetError = InterestError::Interrupted.into();
        assert!(matches!(e, NetError::Interest(InterestError::Interrupted)));
    }
}
