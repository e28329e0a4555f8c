//! # ncc-core
//!
//! Core types for the ncc length-prefixed messaging transport.
//!
//! This crate is platform-agnostic and contains no socket or multiplexer
//! code. The Linux reactor, client and session handling live in
//! `ncc-runtime`.
//!
//! ## Modules
//!
//! - `frame` - Wire frame layout, message catalog, typed encode/decode
//! - `decoder` - Streaming frame decoder over arbitrary byte chunks
//! - `serializer` - Outbound byte queue and its lock/wait wrapper
//! - `io` - Byte source/sink traits and the I/O status taxonomy
//! - `benchmark` - Per-connection I/O timestamps for round-trip timing
//! - `error` - Error types
//! - `log` - Leveled logging macros
//! - `env` - `NCC_*` environment overrides

pub mod frame;
pub mod decoder;
pub mod serializer;
pub mod io;
pub mod benchmark;
pub mod error;
pub mod log;
pub mod env;

// Re-exports for convenience
pub use frame::{
    encode_ack, encode_heartbeat, encode_variable_length, tag_name, Header, Message, MsgType,
    WireFrame, ACK_FRAME_SIZE, HEADER_SIZE, LENGTH_FIELD_SIZE,
};
pub use decoder::{FrameHandler, StreamFrameDecoder};
pub use serializer::{ByteSerializer, WaitableByteSerializer};
pub use io::{ByteSink, ByteSource, IoRecord, IoStatus};
pub use benchmark::{Direction, IoBenchmark};
pub use error::{FrameError, FrameResult};
pub use env::{env_get, env_get_bool, env_get_opt};
