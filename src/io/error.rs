//! Custom error types for the framing layer.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Response exceeded the maximum buffer size of {limit} bytes without a terminator.")]
    ResponseTooLarge { limit: usize },
}
