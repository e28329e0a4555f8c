//! Library defaults, overridable through `NCC_*` environment variables.

/// Bytes read from one socket per readiness turn
pub const READ_THRESHOLD: usize = 1024;

/// Bytes written to one socket per readiness turn
pub const WRITE_THRESHOLD: usize = 1024;

/// Pending-connection queue length passed to listen(2)
pub const LISTEN_BACKLOG: i32 = 1024;

/// Ready events fetched per multiplexer wait
pub const MAX_EVENTS: usize = 1024;
