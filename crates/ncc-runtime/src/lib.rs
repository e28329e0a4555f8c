//! # ncc-runtime
//!
//! Linux runtime for the ncc messaging transport.
//!
//! This crate provides:
//! - Interest-list bookkeeping over epoll
//! - Socket helpers and socket-backed byte sources/sinks
//! - Per-connection sessions and the session registry
//! - The single-threaded reactor server
//! - The three-thread blocking client
//! - Configuration with environment overrides

pub mod config;
pub mod error;

// Platform detection
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod interest;
        pub mod waker;
        pub mod socket;
        pub mod session;
        pub mod console;
        pub mod reactor;
        pub mod client;

        pub use interest::{Epoll, Interest, InterestListController, Multiplexer, ReadyEvent};
        pub use session::{AckResponder, Session, SessionRegistry, SessionStats, SlotState};
        pub use reactor::{send_pending_then_rearm, Server, ServerHandle};
        pub use client::{ClientHandle, TcpClient};
        pub use console::run_input_loop;
    } else {
        compile_error!("Unsupported platform: ncc-runtime requires Linux (epoll, eventfd)");
    }
}

// Re-exports
pub use config::{ClientConfig, ConfigError, Mode, ServerConfig};
pub use error::{InterestError, NetError, NetResult};
