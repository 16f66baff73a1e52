//! Transports to the engine process.
//!
//! Two interchangeable implementations sit behind the [`Transport`] trait:
//! - [`stream::StreamTransport`]: child process over stdin/stdout, NUL-framed
//! - [`http::HttpTransport`]: engine in HTTP server mode, one GET per command
//!
//! Out-of-band signals (interrupt, kill) go through a [`ProcessControl`]
//! handle that can be used without exclusive access to the transport, so a
//! hung command can be cancelled while another task is blocked inside `send`.

pub mod escape;
pub mod http;
pub mod process;
pub mod stream;

use crate::error::{EngineError, Result, TransportError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;

pub use http::HttpTransport;
pub use process::ProcessGroup;
pub use stream::StreamTransport;

/// Which transport a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stream,
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stream => write!(f, "stream"),
            TransportKind::Http => write!(f, "http"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stream" | "pipe" => Ok(TransportKind::Stream),
            "http" => Ok(TransportKind::Http),
            other => Err(EngineError::Config(format!("unknown transport '{}'", other))),
        }
    }
}

/// How to launch the engine for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum LaunchSpec {
    /// Open a target file; `flags` are extra engine options split on whitespace.
    File { path: PathBuf, flags: String },
    /// Pass exactly these arguments (remote attach, debugger sessions, ...).
    Raw { args: Vec<String> },
}

impl LaunchSpec {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        LaunchSpec::File {
            path: path.into(),
            flags: String::new(),
        }
    }

    pub fn file_with_flags(path: impl Into<PathBuf>, flags: impl Into<String>) -> Self {
        LaunchSpec::File {
            path: path.into(),
            flags: flags.into(),
        }
    }

    pub fn raw<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LaunchSpec::Raw {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Arguments for a file launch: `mode_args`, user flags, then the target.
    /// Raw launches ignore `mode_args`.
    pub fn to_args(&self, mode_args: &[&str]) -> Vec<String> {
        match self {
            LaunchSpec::File { path, flags } => {
                let mut args: Vec<String> = mode_args.iter().map(|s| s.to_string()).collect();
                args.extend(flags.split_whitespace().map(str::to_string));
                args.push(path.to_string_lossy().into_owned());
                args
            }
            LaunchSpec::Raw { args } => args.clone(),
        }
    }
}

impl fmt::Display for LaunchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchSpec::File { path, flags } if flags.is_empty() => {
                write!(f, "{}", path.display())
            }
            LaunchSpec::File { path, flags } => write!(f, "{} ({})", path.display(), flags),
            LaunchSpec::Raw { args } => write!(f, "raw: {}", args.join(" ")),
        }
    }
}

/// Receives successive pieces of a streamed response.
pub type ChunkSink<'a> = dyn FnMut(&[u8]) -> Result<()> + Send + 'a;

/// Out-of-band control over the engine process.
///
/// Implementations must be callable from any task at any time, including
/// while a command is blocked inside [`Transport::send`].
pub trait ProcessControl: Send + Sync + fmt::Debug {
    /// OS process id of the engine (or its wrapper), if there is a child.
    fn pid(&self) -> Option<u32>;
    /// False once the transport failed or was killed.
    fn is_alive(&self) -> bool;
    /// Record that the transport can no longer be used.
    fn mark_dead(&self);
    /// Deliver a cooperative cancel signal to the process group.
    fn interrupt(&self);
    /// Kill the process group immediately; unblocks pending reads.
    fn kill(&self);
    /// Flips to `true` once [`ProcessControl::kill`] has run.
    fn kill_signal(&self) -> watch::Receiver<bool>;
}

/// Drive `io` until it completes or `control` is killed.
///
/// Transports without a child of their own (attached servers, wrapped
/// sockets) have nothing to signal, so this is what releases a caller
/// blocked in `send` when the session is force-closed.
pub(crate) async fn unless_killed<T, F>(control: &dyn ProcessControl, io: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let mut killed = control.kill_signal();
    tokio::select! {
        result = io => result,
        _ = wait_killed(&mut killed) => Err(TransportError::Killed.into()),
    }
}

async fn wait_killed(killed: &mut watch::Receiver<bool>) {
    if killed.wait_for(|k| *k).await.is_err() {
        // The control is gone without ever being killed.
        std::future::pending::<()>().await;
    }
}

/// A started connection to the engine.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Shared control handle for signals outside the command section.
    fn control(&self) -> Arc<dyn ProcessControl>;

    fn pid(&self) -> Option<u32> {
        self.control().pid()
    }

    fn is_alive(&self) -> bool {
        self.control().is_alive()
    }

    fn interrupt(&self) {
        self.control().interrupt()
    }

    /// Run one command and return its full textual result.
    async fn send(&mut self, command: &str) -> Result<String>;

    /// Run one command and deliver its raw result piecewise; returns the byte count.
    async fn send_streaming(&mut self, command: &str, sink: &mut ChunkSink<'_>) -> Result<u64>;

    /// Tear the engine down, politely first when `graceful`.
    async fn terminate(&mut self, graceful: bool);
}

/// Commands are line-delimited on the stream transport; reject anything that
/// would split into two requests.
pub(crate) fn validate_command(command: &str) -> Result<()> {
    if command.contains(['\n', '\r']) {
        return Err(EngineError::InvalidInput(
            "command must not contain line breaks".to_string(),
        ));
    }
    Ok(())
}
