//! Configuration for the engine channel and view caches.
//!
//! Provides centralized configuration with sensible defaults. Every
//! section is `serde`-loadable so an application can keep it in a JSON
//! settings file; a few fields can be overridden from the environment.

use crate::error::{EngineError, Result};
use crate::io::{FrameLimits, DEFAULT_INITIAL_BUFFER, DEFAULT_MAX_BUFFER};
use crate::timeout::DEFAULT_STARTUP_SECONDS;
use crate::transport::TransportKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding [`EngineConfig::engine_path`].
pub const ENV_ENGINE: &str = "ENGINELINK_ENGINE";
/// Environment variable overriding [`EngineConfig::transport`] (`stream` or `http`).
pub const ENV_TRANSPORT: &str = "ENGINELINK_TRANSPORT";
/// Environment variable overriding [`HttpConfig::port`].
pub const ENV_HTTP_PORT: &str = "ENGINELINK_HTTP_PORT";

/// Master configuration for the command channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable, resolved through `PATH` when relative.
    pub engine_path: PathBuf,
    /// Which transport `open` starts.
    pub transport: TransportKind,
    /// Upper bound on launching the engine and reading its first frame.
    pub startup_timeout_secs: u64,
    /// Cheap command run after launch to confirm the engine responds.
    pub probe_command: String,
    /// Command sent for a graceful quit.
    pub quit_command: String,
    /// How long a graceful teardown waits before force-killing.
    pub grace_period_ms: u64,
    /// Stream transport settings.
    pub stream: StreamConfig,
    /// HTTP transport settings.
    pub http: HttpConfig,
    /// Windowed view settings.
    pub view: ViewConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_path: PathBuf::from("r2"),
            transport: TransportKind::Stream,
            startup_timeout_secs: DEFAULT_STARTUP_SECONDS,
            probe_command: "?V".to_string(),
            quit_command: "q!".to_string(),
            grace_period_ms: 2000,
            stream: StreamConfig::default(),
            http: HttpConfig::default(),
            view: ViewConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON; absent fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    /// Apply `ENGINELINK_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(engine) = std::env::var(ENV_ENGINE) {
            let trimmed = engine.trim();
            if !trimmed.is_empty() {
                self.engine_path = PathBuf::from(trimmed);
            }
        }
        if let Ok(kind) = std::env::var(ENV_TRANSPORT) {
            self.transport = kind.parse()?;
        }
        if let Ok(port) = std::env::var(ENV_HTTP_PORT) {
            self.http.port = port
                .trim()
                .parse()
                .map_err(|_| EngineError::Config(format!("invalid {}: {}", ENV_HTTP_PORT, port)))?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject settings that would make the channel unusable.
    pub fn validate(&self) -> Result<()> {
        if self.engine_path.as_os_str().is_empty() {
            return Err(EngineError::Config("engine_path is empty".into()));
        }
        if self.stream.max_buffer_bytes == 0 {
            return Err(EngineError::Config("stream.max_buffer_bytes must be > 0".into()));
        }
        if self.stream.initial_buffer_bytes > self.stream.max_buffer_bytes {
            return Err(EngineError::Config(
                "stream.initial_buffer_bytes exceeds stream.max_buffer_bytes".into(),
            ));
        }
        if self.http.port == 0 {
            return Err(EngineError::Config("http.port must be non-zero".into()));
        }
        if self.view.chunk_rows == 0 {
            return Err(EngineError::Config("view.chunk_rows must be > 0".into()));
        }
        if self.view.max_cached_chunks == 0 {
            return Err(EngineError::Config(
                "view.max_cached_chunks must be > 0".into(),
            ));
        }
        if self.view.default_instruction_len == 0 {
            return Err(EngineError::Config(
                "view.default_instruction_len must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Stream (stdin/stdout) transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Response buffer allocated up front.
    pub initial_buffer_bytes: usize,
    /// Largest response buffered before a protocol error.
    pub max_buffer_bytes: usize,
    /// Read the terminator the engine emits once it has loaded the target.
    pub await_startup_frame: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_buffer_bytes: DEFAULT_INITIAL_BUFFER,
            max_buffer_bytes: DEFAULT_MAX_BUFFER,
            await_startup_frame: true,
        }
    }
}

impl StreamConfig {
    pub fn limits(&self) -> FrameLimits {
        FrameLimits {
            initial_buffer: self.initial_buffer_bytes,
            max_buffer: self.max_buffer_bytes,
        }
    }
}

/// HTTP transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Loopback host the engine binds to.
    pub host: String,
    /// Port the engine's HTTP server listens on.
    pub port: u16,
    /// Readiness probes before giving up.
    pub ready_attempts: u32,
    /// Delay between readiness probes.
    pub ready_interval_ms: u64,
    /// Per-command read timeout; commands may legitimately run for minutes.
    pub read_timeout_secs: u64,
    /// Timeout for the quit request during teardown.
    pub quit_timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9090,
            ready_attempts: 50,
            ready_interval_ms: 100,
            read_timeout_secs: 600,
            quit_timeout_ms: 1000,
        }
    }
}

impl HttpConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn ready_interval(&self) -> Duration {
        Duration::from_millis(self.ready_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn quit_timeout(&self) -> Duration {
        Duration::from_millis(self.quit_timeout_ms)
    }
}

/// Windowed view configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Rows fetched per engine command.
    pub chunk_rows: usize,
    /// Chunks preloaded on each side of a focus address.
    pub preload_radius: usize,
    /// Span used when neither sections nor a file size are known.
    pub default_span: u64,
    /// Instruction length assumed before any instruction is loaded.
    pub default_instruction_len: u64,
    /// Chunks kept per view before the ones farthest from the last load are evicted.
    pub max_cached_chunks: usize,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            chunk_rows: 64,
            preload_radius: 2,
            default_span: 0x10000,
            default_instruction_len: 4,
            max_cached_chunks: 512,
        }
    }
}
