//! `NCC_*` environment overrides
//!
//! Every tunable read from the environment is named here, so the logging
//! and configuration layers agree on spelling. Values are trimmed before
//! parsing; unset or unparsable values fall back to the caller's default.

use std::str::FromStr;

/// Log level name or digit, see [`crate::log::LogLevel`]
pub const LOG_LEVEL: &str = "NCC_LOG_LEVEL";
/// Flush stderr after every log line
pub const LOG_FLUSH: &str = "NCC_LOG_FLUSH";
/// listen(2) backlog
pub const LISTEN_BACKLOG: &str = "NCC_LISTEN_BACKLOG";
/// Bytes read per socket per turn
pub const READ_THRESHOLD: &str = "NCC_READ_THRESHOLD";
/// Bytes written per socket per turn
pub const WRITE_THRESHOLD: &str = "NCC_WRITE_THRESHOLD";
/// Ready events fetched per multiplexer wait
pub const MAX_EVENTS: &str = "NCC_MAX_EVENTS";

/// Parsed value of `key`, if set and well formed.
pub fn env_get_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

/// Parsed value of `key`, or `default`.
#[inline]
pub fn env_get<T: FromStr>(key: &str, default: T) -> T {
    env_get_opt(key).unwrap_or(default)
}

/// `1`, `true`, `yes`, `on` (any case) are true; `0`, `false`, `no`, `off`
/// are false. Anything else, or unset, gives `default`.
pub fn env_get_bool(key: &str, default: bool) -> bool {
    let Ok(val) = std::env::var(key) else {
        return default;
    };
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}
