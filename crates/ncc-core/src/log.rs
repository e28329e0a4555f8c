//! Leveled logging for ncc
//!
//! Thread-safe, optionally-flushing line output with a process-wide level.
//! Lines go through a [`LogSink`], which defaults to stderr and can be
//! swapped out (tests install a capturing sink).
//!
//! # Environment Variables
//!
//! - `NCC_LOG_LEVEL=<level>` - off, error, warn, info, debug, trace (or 0-5)
//! - `NCC_LOG_FLUSH=1` - Flush stderr after each line
//!
//! # Usage
//!
//! ```ignore
//! use ncc_core::{log_info, log_debug, log_errno};
//! use ncc_core::log::{self, LogLevel};
//!
//! log::init();
//! log_info!("{}|Accepted|{}", fd, peer);
//! log_debug!("{}|+|{}", fd, interest);
//! log_errno!(LogLevel::Error, errno, "{}|Failed to close peer", fd);
//! ```

use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::env::{self, env_get_bool, env_get_opt};

/// Severity, most severe first. `Off` silences everything.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    const ALL: [LogLevel; 6] = [
        LogLevel::Off,
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    /// Level stored as `v`; anything past the end is Trace.
    pub fn from_u8(v: u8) -> Self {
        Self::ALL.get(v as usize).copied().unwrap_or(LogLevel::Trace)
    }

    pub const fn name(self) -> &'static str {
        match self {
            LogLevel::Off => "OFF",
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Accepts a level name in any case, or its number (0-5).
impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(n) = s.parse::<u8>() {
            return Self::ALL.get(n as usize).copied().ok_or(());
        }
        Self::ALL
            .into_iter()
            .find(|level| level.name().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

/// Destination for formatted log lines.
///
/// Implementations receive lines that already passed the level gate.
pub trait LogSink: Send + Sync {
    fn write_line(&self, level: LogLevel, args: &fmt::Arguments<'_>);
}

/// Default sink: one locked write per line on stderr.
pub struct StderrSink;

impl LogSink for StderrSink {
    fn write_line(&self, level: LogLevel, args: &fmt::Arguments<'_>) {
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        let _ = write!(handle, "[{:<5}] ", level);
        let _ = handle.write_fmt(*args);
        let _ = handle.write_all(b"\n");
        if FLUSH_ENABLED.load(Ordering::Relaxed) {
            let _ = handle.flush();
        }
    }
}

static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);
static SINK: RwLock<Option<Arc<dyn LogSink>>> = RwLock::new(None);

/// Initialize logging from environment variables.
///
/// Binaries call this once at startup. Later calls are no-ops, so a level
/// injected with [`set_log_level`] before `init` is overridden only when
/// `NCC_LOG_LEVEL` is set.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    FLUSH_ENABLED.store(env_get_bool(env::LOG_FLUSH, false), Ordering::Relaxed);

    if let Some(level) = env_get_opt::<LogLevel>(env::LOG_LEVEL) {
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

/// Get current log level
#[inline]
pub fn log_level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Set log level programmatically
pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Set flush mode programmatically
pub fn set_flush_enabled(enabled: bool) {
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Install a sink, returning the previously installed one (if any).
///
/// `None` restores the stderr default.
pub fn set_sink(sink: Option<Arc<dyn LogSink>>) -> Option<Arc<dyn LogSink>> {
    let mut slot = SINK.write().unwrap_or_else(PoisonError::into_inner);
    std::mem::replace(&mut *slot, sink)
}

/// Check if a log level is enabled
#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

#[doc(hidden)]
pub fn _log_impl(level: LogLevel, args: fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let slot = SINK.read().unwrap_or_else(PoisonError::into_inner);
    match slot.as_ref() {
        Some(sink) => sink.write_line(level, &args),
        None => StderrSink.write_line(level, &args),
    }
}

#[doc(hidden)]
pub fn _log_errno_impl(level: LogLevel, errno: nix::errno::Errno, args: fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    _log_impl(
        level,
        format_args!("{}: errno({}): {}", args, errno as i32, errno.desc()),
    );
}

// ============================================================================
// Public Macros
// ============================================================================

/// Error level log
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Error, format_args!($($arg)*));
    }};
}

/// Warning level log
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Warn, format_args!($($arg)*));
    }};
}

/// Info level log
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Info, format_args!($($arg)*));
    }};
}

/// Debug level log
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Debug, format_args!($($arg)*));
    }};
}

/// Trace level log (most verbose)
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Trace, format_args!($($arg)*));
    }};
}

/// Log with `errno(N): description` appended
#[macro_export]
macro_rules! log_errno {
    ($level:expr, $errno:expr, $($arg:tt)*) => {{
        $crate::log::_log_errno_impl($level, $errno, format_args!($($arg)*));
    }};
}

// ============================================================================
// Tests
// ============================================================================
