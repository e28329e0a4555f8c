//! Error types for frame decoding

use core::fmt;

/// Result type for frame operations
pub type FrameResult<T> = Result<T, FrameError>;

/// Errors produced while interpreting a decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than the fixed part of the message requires
    Truncated { needed: usize, available: usize },

    /// The length prefix disagrees with the number of bytes handed over
    LengthMismatch { declared: usize, actual: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Truncated { needed, available } => {
                write!(f, "truncated frame: need {} bytes, have {}", needed, available)
            }
            FrameError::LengthMismatch { declared, actual } => {
                write!(f, "frame length mismatch: declared {}, got {}", declared, actual)
            }
        }
    }
}

impl std::error::Error for FrameError {}
