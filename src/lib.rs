//! enginelink: a serialized command channel to an external binary-analysis
//! engine, and windowed caches over the bytes and instructions it reports.
//!
//! The crate is organised leaves first:
//! - [`io`]: NUL-framed response reading with adaptive buffer growth
//! - [`transport`]: stream (stdin/stdout) and HTTP transports to the engine
//! - [`channel`]: the single-session, single-flight command channel
//! - [`repository`]: the narrow data-source interface used by the views
//! - [`view`]: demand-paged hex and disassembly windows

/// Core data types module
pub mod core;

pub mod channel;
pub mod config;
pub mod error;
pub mod io;
pub mod logging;
pub mod repository;
pub mod timeout;
pub mod transport;
pub mod view;

pub use channel::{ChannelState, CommandChannel, SessionInfo};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use transport::{LaunchSpec, TransportKind};
