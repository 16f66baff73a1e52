//! Stdin/stdout transport with NUL-terminated responses.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result, TransportError};
use crate::io::{FrameLimits, FrameReader};
use crate::timeout::{with_timeout, TimeoutConfig};
use crate::transport::process::{abort_drains, ProcessGroup, StdioPlan};
use crate::transport::{
    unless_killed, validate_command, ChunkSink, LaunchSpec, ProcessControl, Transport,
    TransportKind,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Engine flags for quiet, NUL-terminated pipe mode.
pub const STREAM_MODE_ARGS: &[&str] = &["-q0"];

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Talks to an engine child over its standard streams.
///
/// Requests are `command\n`; every response ends with one `0x00` byte.
pub struct StreamTransport {
    control: Arc<dyn ProcessControl>,
    process: Option<Arc<ProcessGroup>>,
    writer: BoxedWriter,
    reader: FrameReader<BoxedReader>,
    drains: Vec<JoinHandle<()>>,
    quit_command: String,
    grace: Duration,
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("pid", &self.control.pid())
            .field("alive", &self.control.is_alive())
            .field("capacity", &self.reader.capacity())
            .finish()
    }
}

impl StreamTransport {
    /// Spawn the engine in pipe mode and wait for it to finish loading.
    pub async fn start(spec: &LaunchSpec, config: &EngineConfig) -> Result<Self> {
        let args = spec.to_args(STREAM_MODE_ARGS);
        let mut spawned = ProcessGroup::spawn(&config.engine_path, &args, StdioPlan::Protocol)?;

        let (stdin, stdout) = match (spawned.stdin.take(), spawned.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                spawned.process.kill();
                abort_drains(&mut spawned.drains);
                return Err(EngineError::StartupFailure(
                    "engine standard streams unavailable".to_string(),
                ));
            }
        };

        let process = spawned.process;
        let mut transport = Self {
            control: process.clone(),
            process: Some(process),
            writer: Box::new(stdin),
            reader: FrameReader::new(Box::new(stdout), config.stream.limits()),
            drains: spawned.drains,
            quit_command: config.quit_command.clone(),
            grace: config.grace_period(),
        };

        if config.stream.await_startup_frame {
            let timeout = TimeoutConfig::new(config.startup_timeout(), "engine startup frame");
            let startup = with_timeout(timeout, transport.reader.read_frame()).await;
            if let Err(e) = startup {
                warn!(error = %e, "Engine did not complete startup");
                transport.terminate(false).await;
                return Err(match e {
                    EngineError::Timeout { .. } => e,
                    other => EngineError::StartupFailure(other.to_string()),
                });
            }
        }

        info!(pid = ?transport.control.pid(), target = %spec, "Stream transport ready");
        Ok(transport)
    }

    /// Wrap already-connected streams, e.g. a socket to a remote engine.
    ///
    /// No child process is owned; `control` decides what interrupt and kill do.
    pub fn from_parts<W, R>(
        writer: W,
        reader: R,
        control: Arc<dyn ProcessControl>,
        limits: FrameLimits,
        quit_command: impl Into<String>,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            control,
            process: None,
            writer: Box::new(writer),
            reader: FrameReader::new(Box::new(reader), limits),
            drains: Vec::new(),
            quit_command: quit_command.into(),
            grace: Duration::ZERO,
        }
    }

    /// Current response buffer capacity.
    pub fn buffer_capacity(&self) -> usize {
        self.reader.capacity()
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.control.is_alive() {
            Ok(())
        } else {
            Err(TransportError::Dead.into())
        }
    }

    async fn write_request(&mut self, command: &str) -> Result<()> {
        self.reader.discard_pending().await?;
        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Fatal errors leave the stream in an unknown position.
    fn check<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.control.mark_dead();
            }
        }
        result
    }
}

#[async_trait]
impl Transport for StreamTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn control(&self) -> Arc<dyn ProcessControl> {
        self.control.clone()
    }

    async fn send(&mut self, command: &str) -> Result<String> {
        self.ensure_alive()?;
        validate_command(command)?;
        debug!(command, "Sending command over stream");

        let control = self.control.clone();
        let frame = unless_killed(control.as_ref(), async {
            self.write_request(command).await?;
            self.reader.read_frame().await
        })
        .await;
        let frame = self.check(frame)?;

        let text = String::from_utf8_lossy(&frame);
        Ok(text.trim_end().to_string())
    }

    async fn send_streaming(&mut self, command: &str, sink: &mut ChunkSink<'_>) -> Result<u64> {
        self.ensure_alive()?;
        validate_command(command)?;
        debug!(command, "Streaming command over stream");

        let control = self.control.clone();
        let delivered = unless_killed(control.as_ref(), async {
            self.write_request(command).await?;
            self.reader.stream_frame(|chunk| sink(chunk)).await
        })
        .await;
        if delivered.is_err() {
            // The frame was abandoned mid-way; the stream position is lost.
            self.control.mark_dead();
        }
        delivered
    }

    async fn terminate(&mut self, graceful: bool) {
        let pid = self.control.pid();
        if graceful && self.control.is_alive() {
            let quit = format!("{}\n", self.quit_command);
            let sent = async {
                self.writer.write_all(quit.as_bytes()).await?;
                self.writer.flush().await
            }
            .await;
            if let Err(e) = sent {
                debug!(pid = ?pid, error = %e, "Quit command not delivered");
            }
            let _ = self.writer.shutdown().await;

            let exited = match &self.process {
                Some(process) => process.wait_exit(self.grace).await,
                None => true,
            };
            if !exited {
                warn!(pid = ?pid, "Engine ignored quit; killing process group");
            }
        }

        self.control.kill();
        abort_drains(&mut self.drains);
        info!(pid = ?pid, graceful, "Stream transport terminated");
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        if self.process.is_some() {
            self.control.kill();
        }
        abort_drains(&mut self.drains);
    }
}
