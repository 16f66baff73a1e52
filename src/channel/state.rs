//! Observable channel state and session snapshots.

use crate::transport::{LaunchSpec, TransportKind};
use serde::Serialize;
use std::fmt;

/// What the channel is doing, as seen from outside the command section.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChannelState {
    #[default]
    Idle,
    Executing {
        command: String,
    },
    Succeeded {
        command: String,
        /// Textual result; empty for streamed commands.
        result: String,
        /// Response size in bytes.
        bytes: u64,
    },
    Failed {
        command: String,
        error: String,
    },
}

impl ChannelState {
    pub fn is_executing(&self) -> bool {
        matches!(self, ChannelState::Executing { .. })
    }

    /// The command this state refers to, if any.
    pub fn command(&self) -> Option<&str> {
        match self {
            ChannelState::Idle => None,
            ChannelState::Executing { command }
            | ChannelState::Succeeded { command, .. }
            | ChannelState::Failed { command, .. } => Some(command),
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Idle => write!(f, "idle"),
            ChannelState::Executing { command } => write!(f, "executing '{}'", command),
            ChannelState::Succeeded { command, bytes, .. } => {
                write!(f, "'{}' succeeded ({} bytes)", command, bytes)
            }
            ChannelState::Failed { command, error } => write!(f, "'{}' failed: {}", command, error),
        }
    }
}

/// Point-in-time description of the open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub session_id: u64,
    pub kind: TransportKind,
    pub pid: Option<u32>,
    pub connected: bool,
    /// Any command has run since open or the last checkpoint.
    pub dirty: bool,
    pub launch: LaunchSpec,
    /// First line of the probe command's answer.
    pub version: String,
}
