//! Error types for the engine channel and view caches.
//!
//! This module provides structured error handling using thiserror. Transport
//! and framing failures carry their own enums so callers can tell a dead
//! session apart from a malformed response.

use thiserror::Error;

pub use crate::io::error::ProtocolError;

/// Failures of the underlying transport. Any of these leaves the transport dead.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Pipe or socket I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client failure (connect, read timeout, body decode)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The engine answered with a non-success HTTP status
    #[error("engine returned HTTP status {0}")]
    Status(u16),

    /// The engine closed its output before terminating the response
    #[error("engine closed the stream before the response terminator")]
    UnexpectedEof,

    /// A previous failure already marked the transport dead
    #[error("transport is dead")]
    Dead,

    /// The session was killed while a command was in flight
    #[error("transport was killed mid-command")]
    Killed,
}

/// Main error type for enginelink operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No session is open on the channel
    #[error("Not connected to an engine session")]
    NotConnected,

    /// The engine process failed to launch or answer its first command
    #[error("Engine startup failed: {0}")]
    StartupFailure(String),

    /// HTTP readiness polling exhausted its retry budget
    #[error("Engine did not become ready after {attempts} attempts ({waited_ms}ms)")]
    StartupTimeout { attempts: u32, waited_ms: u64 },

    /// I/O failure mid-command; the session is presumed dead
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Oversized or malformed response framing
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The engine ran the command but the result could not be interpreted
    #[error("Command '{command}' failed: {message}")]
    CommandFailure { command: String, message: String },

    /// Operation exceeded its time budget
    #[error("Operation timeout after {seconds}s")]
    Timeout { seconds: u64 },

    /// Invalid caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// True when the error means the session's transport can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Transport(_) | EngineError::Protocol(_))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Transport(TransportError::Io(err))
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Transport(TransportError::Http(err))
    }
}

/// Result type alias for enginelink operations
pub type Result<T> = std::result::Result<T, EngineError>;
