//! NUL-framed response reading for the stream transport.
//!
//! The engine terminates every response with a single `0x00` byte. This
//! module provides a `FrameReader` that accumulates output in a growable
//! buffer, splits off exactly one response per call, and can discard
//! leftover bytes before the next request is written so fragments of an
//! earlier response never leak into the next one.

pub mod error;

use crate::error::{Result, TransportError};
use crate::io::error::ProtocolError;
use bytes::{Buf, Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace, warn};

/// Initial response buffer size (256KB).
pub const DEFAULT_INITIAL_BUFFER: usize = 256 * 1024;
/// Hard ceiling for a single buffered response (4MB).
pub const DEFAULT_MAX_BUFFER: usize = 4 * 1024 * 1024;

const FRAME_TERMINATOR: u8 = 0x00;
const DRAIN_CHUNK: usize = 4096;

/// Defines the buffer limits for framed reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Capacity allocated before the first response is read.
    pub initial_buffer: usize,
    /// Largest unterminated response that will be buffered.
    pub max_buffer: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            initial_buffer: DEFAULT_INITIAL_BUFFER,
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }
}

impl FrameLimits {
    /// Limits with the initial size clamped into `[1, max_buffer]`.
    pub fn normalized(self) -> Self {
        let max_buffer = self.max_buffer.max(1);
        Self {
            initial_buffer: self.initial_buffer.clamp(1, max_buffer),
            max_buffer,
        }
    }
}

/// Reads NUL-terminated responses from an async byte stream.
///
/// Bytes that arrive after a terminator are kept as residual until
/// [`FrameReader::discard_pending`] drops them.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    capacity: usize,
    limits: FrameLimits,
    frames_read: u64,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R, limits: FrameLimits) -> Self {
        let limits = limits.normalized();
        Self {
            inner,
            buf: BytesMut::with_capacity(limits.initial_buffer),
            capacity: limits.initial_buffer,
            limits,
            frames_read: 0,
        }
    }

    /// Current logical buffer capacity; doubles as large responses arrive.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes received after the last terminator and not yet consumed.
    pub fn residual_len(&self) -> usize {
        self.buf.len()
    }

    /// Number of complete frames returned so far.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn limits(&self) -> &FrameLimits {
        &self.limits
    }

    /// Read one complete response, excluding its terminator.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::ResponseTooLarge` once unterminated output
    /// exceeds `limits.max_buffer`, and `TransportError::UnexpectedEof` if the stream
    /// ends before a terminator arrives.
    pub async fn read_frame(&mut self) -> Result<Bytes> {
        let mut scanned = 0usize;

        loop {
            if let Some(pos) = memchr::memchr(FRAME_TERMINATOR, &self.buf[scanned..]) {
                let end = scanned + pos;
                let frame = self.buf.split_to(end).freeze();
                self.buf.advance(1);
                self.frames_read += 1;
                trace!(
                    len = frame.len(),
                    residual = self.buf.len(),
                    "Read framed response"
                );
                return Ok(frame);
            }
            scanned = self.buf.len();

            if self.buf.len() >= self.capacity {
                self.grow()?;
            }

            let want = (self.capacity - self.buf.len()) as u64;
            let n = (&mut self.inner).take(want).read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(TransportError::UnexpectedEof.into());
            }
        }
    }

    /// Read one response and hand it to `sink` piecewise instead of buffering it.
    ///
    /// No ceiling applies here since nothing accumulates. Returns the number of
    /// payload bytes delivered.
    pub async fn stream_frame<F>(&mut self, mut sink: F) -> Result<u64>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let mut delivered = 0u64;

        loop {
            if !self.buf.is_empty() {
                if let Some(pos) = memchr::memchr(FRAME_TERMINATOR, &self.buf) {
                    if pos > 0 {
                        sink(&self.buf[..pos])?;
                    }
                    delivered += pos as u64;
                    self.buf.advance(pos + 1);
                    self.frames_read += 1;
                    return Ok(delivered);
                }
                sink(&self.buf)?;
                delivered += self.buf.len() as u64;
                self.buf.clear();
            }

            let want = self.limits.initial_buffer as u64;
            let n = (&mut self.inner).take(want).read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(TransportError::UnexpectedEof.into());
            }
        }
    }

    /// Drop residual bytes and anything already readable without waiting.
    ///
    /// Call before writing the next request. Returns how many bytes were dropped.
    pub async fn discard_pending(&mut self) -> Result<usize> {
        let mut dropped = self.buf.len();
        self.buf.clear();

        let mut scratch = [0u8; DRAIN_CHUNK];
        loop {
            match tokio::time::timeout(Duration::ZERO, self.inner.read(&mut scratch)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => dropped += n,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => break,
            }
        }

        if dropped > 0 {
            debug!(bytes = dropped, "Discarded residual engine output");
        }
        Ok(dropped)
    }

    /// Room for a `max_buffer` payload plus its terminator.
    fn ceiling(&self) -> usize {
        self.limits.max_buffer.saturating_add(1)
    }

    fn grow(&mut self) -> Result<()> {
        if self.capacity >= self.ceiling() {
            warn!(
                limit = self.limits.max_buffer,
                "Unterminated response reached the buffer ceiling"
            );
            self.buf.clear();
            return Err(ProtocolError::ResponseTooLarge {
                limit: self.limits.max_buffer,
            }
            .into());
        }

        let next = self.capacity.saturating_mul(2).min(self.ceiling());
        debug!(from = self.capacity, to = next, "Growing response buffer");
        self.buf.reserve(next - self.buf.len());
        self.capacity = next;
        Ok(())
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
