//! ncc Configuration
//!
//! Library defaults with runtime environment overrides, plus command-line
//! mode selection.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder setters (programmatic)
//! 2. Environment variables
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use ncc_runtime::config::{Mode, ServerConfig};
//!
//! let args: Vec<String> = std::env::args().skip(1).collect();
//! match Mode::from_args(&args)? {
//!     Mode::Server(cfg) => { /* ncc <port> */ }
//!     Mode::Client(cfg) => { /* ncc <host> <port> */ }
//! }
//!
//! // Or customize programmatically
//! let config = ServerConfig::from_env().listening_port(0).read_threshold(4096);
//! ```

pub mod defaults;

use std::fmt;

use ncc_core::env::{self, env_get};

/// Reactor server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// TCP port to listen on (0 picks a free port)
    pub listening_port: u16,
    /// listen(2) backlog
    pub listening_backlog: i32,
    /// Max bytes read per socket per turn
    pub read_threshold: usize,
    /// Max bytes written per socket per turn
    pub write_threshold: usize,
    /// Max ready events per wait
    pub max_events: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ServerConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `NCC_LISTEN_BACKLOG` - listen(2) backlog
    /// - `NCC_READ_THRESHOLD` - bytes read per turn
    /// - `NCC_WRITE_THRESHOLD` - bytes written per turn
    /// - `NCC_MAX_EVENTS` - ready events per wait
    pub fn from_env() -> Self {
        Self {
            listening_port: 0,
            listening_backlog: env_get(env::LISTEN_BACKLOG, defaults::LISTEN_BACKLOG),
            read_threshold: env_get(env::READ_THRESHOLD, defaults::READ_THRESHOLD),
            write_threshold: env_get(env::WRITE_THRESHOLD, defaults::WRITE_THRESHOLD),
            max_events: env_get(env::MAX_EVENTS, defaults::MAX_EVENTS),
        }
    }

    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            listening_port: 0,
            listening_backlog: defaults::LISTEN_BACKLOG,
            read_threshold: defaults::READ_THRESHOLD,
            write_threshold: defaults::WRITE_THRESHOLD,
            max_events: defaults::MAX_EVENTS,
        }
    }

    // Builder methods

    pub fn listening_port(mut self, port: u16) -> Self {
        self.listening_port = port;
        self
    }

    pub fn listening_backlog(mut self, backlog: i32) -> Self {
        self.listening_backlog = backlog;
        self
    }

    pub fn read_threshold(mut self, n: usize) -> Self {
        self.read_threshold = n;
        self
    }

    pub fn write_threshold(mut self, n: usize) -> Self {
        self.write_threshold = n;
        self
    }

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listening_backlog <= 0 {
            return Err(ConfigError::Invalid("listening_backlog must be > 0"));
        }
        if self.read_threshold == 0 {
            return Err(ConfigError::Invalid("read_threshold must be > 0"));
        }
        if self.write_threshold == 0 {
            return Err(ConfigError::Invalid("write_threshold must be > 0"));
        }
        if self.max_events == 0 {
            return Err(ConfigError::Invalid("max_events must be > 0"));
        }
        Ok(())
    }
}

/// Threaded client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub hostname: String,
    pub remote_port: u16,
    /// Max bytes per blocking read
    pub read_threshold: usize,
    /// Max bytes per blocking write
    pub write_threshold: usize,
}

impl ClientConfig {
    /// Defaults with `NCC_READ_THRESHOLD` / `NCC_WRITE_THRESHOLD` overrides.
    pub fn from_env(hostname: impl Into<String>, remote_port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            remote_port,
            read_threshold: env_get(env::READ_THRESHOLD, defaults::READ_THRESHOLD),
            write_threshold: env_get(env::WRITE_THRESHOLD, defaults::WRITE_THRESHOLD),
        }
    }

    pub fn new(hostname: impl Into<String>, remote_port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            remote_port,
            read_threshold: defaults::READ_THRESHOLD,
            write_threshold: defaults::WRITE_THRESHOLD,
        }
    }

    pub fn read_threshold(mut self, n: usize) -> Self {
        self.read_threshold = n;
        self
    }

    pub fn write_threshold(mut self, n: usize) -> Self {
        self.write_threshold = n;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hostname.is_empty() {
            return Err(ConfigError::Invalid("hostname must not be empty"));
        }
        if self.remote_port == 0 {
            return Err(ConfigError::Invalid("remote_port must be > 0"));
        }
        if self.read_threshold == 0 {
            return Err(ConfigError::Invalid("read_threshold must be > 0"));
        }
        if self.write_threshold == 0 {
            return Err(ConfigError::Invalid("write_threshold must be > 0"));
        }
        Ok(())
    }
}

/// What the binary was asked to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Server(ServerConfig),
    Client(ClientConfig),
}

impl Mode {
    /// `[port]` selects the server, `[host, port]` the client.
    ///
    /// `args` excludes the program name.
    pub fn from_args(args: &[String]) -> Result<Mode, ConfigError> {
        let mode = match args {
            [port] => Mode::Server(ServerConfig::from_env().listening_port(parse_port(port)?)),
            [host, port] => Mode::Client(ClientConfig::from_env(host.as_str(), parse_port(port)?)),
            [] => return Err(ConfigError::MissingArgument("listening_port")),
            _ => return Err(ConfigError::Invalid("too many arguments")),
        };
        match &mode {
            Mode::Server(cfg) => cfg.validate()?,
            Mode::Client(cfg) => cfg.validate()?,
        }
        Ok(mode)
    }
}

fn parse_port(s: &str) -> Result<u16, ConfigError> {
    s.parse().map_err(|_| ConfigError::BadPort(s.to_string()))
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingArgument(&'static str),
    BadPort(String),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingArgument(name) => write!(f, "Missing argument: {}", name),
            ConfigError::BadPort(s) => write!(f, "Bad port: {:?}", s),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
