//! HTTP transport: the engine runs its built-in web server and every
//! command is one `GET /cmd/<escaped>` request.

use crate::config::{EngineConfig, HttpConfig};
use crate::error::{EngineError, Result, TransportError};
use crate::timeout::{PollBudget, FAST_TIMEOUT_SECONDS};
use crate::transport::escape::escape_command;
use crate::transport::process::{abort_drains, ProcessGroup, StdioPlan};
use crate::transport::{
    unless_killed, validate_command, ChunkSink, LaunchSpec, ProcessControl, Transport,
    TransportKind,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Engine flags that start the HTTP server on `host:port` without a prompt.
pub fn http_mode_args(http: &HttpConfig) -> Vec<String> {
    vec![
        "-e".to_string(),
        format!("http.port={}", http.port),
        "-e".to_string(),
        format!("http.bind={}", http.host),
        "-qc=H".to_string(),
    ]
}

/// Talks to an engine HTTP server.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    control: Arc<dyn ProcessControl>,
    process: Option<Arc<ProcessGroup>>,
    drains: Vec<JoinHandle<()>>,
    quit_timeout: Duration,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("pid", &self.control.pid())
            .field("alive", &self.control.is_alive())
            .finish()
    }
}

impl HttpTransport {
    /// Spawn the engine in HTTP server mode and wait until it answers.
    pub async fn start(spec: &LaunchSpec, config: &EngineConfig) -> Result<Self> {
        let mode = http_mode_args(&config.http);
        let mode: Vec<&str> = mode.iter().map(String::as_str).collect();
        let args = spec.to_args(&mode);

        let spawned = ProcessGroup::spawn(&config.engine_path, &args, StdioPlan::Detached)?;
        let process = spawned.process;
        let mut transport = Self::build(
            config.http.base_url(),
            process.clone(),
            Some(process),
            spawned.drains,
            &config.http,
        )?;

        if let Err(e) = transport.wait_ready(&config.http).await {
            transport.terminate(false).await;
            return Err(e);
        }
        info!(pid = ?transport.control.pid(), url = %transport.base_url, target = %spec, "HTTP transport ready");
        Ok(transport)
    }

    /// Attach to an engine server somebody else started.
    pub async fn connect(base_url: impl Into<String>, http: &HttpConfig) -> Result<Self> {
        let transport = Self::build(
            base_url.into(),
            ProcessGroup::detached(),
            None,
            Vec::new(),
            http,
        )?;
        transport.wait_ready(http).await?;
        info!(url = %transport.base_url, "Attached to engine HTTP server");
        Ok(transport)
    }

    fn build(
        base_url: String,
        control: Arc<dyn ProcessControl>,
        process: Option<Arc<ProcessGroup>>,
        drains: Vec<JoinHandle<()>>,
        http: &HttpConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(http.read_timeout())
            .build()
            .map_err(|e| EngineError::StartupFailure(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            control,
            process,
            drains,
            quit_timeout: http.quit_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn command_url(&self, command: &str) -> String {
        format!("{}/cmd/{}", self.base_url, escape_command(command))
    }

    async fn wait_ready(&self, http: &HttpConfig) -> Result<()> {
        let url = self.command_url("?");
        let mut budget = PollBudget::new(
            http.ready_attempts,
            http.ready_interval(),
            "engine HTTP readiness",
        );

        while budget.attempt() {
            if let Some(process) = &self.process {
                if process.has_exited() {
                    return Err(EngineError::StartupFailure(
                        "engine exited before its HTTP server became ready".to_string(),
                    ));
                }
            }

            let probe = self
                .client
                .get(&url)
                .timeout(Duration::from_secs(FAST_TIMEOUT_SECONDS))
                .send()
                .await;
            match probe {
                Ok(resp) if resp.status().is_success() => {
                    debug!(attempts = budget.attempts(), "Engine HTTP server ready");
                    return Ok(());
                }
                Ok(resp) => trace!(status = resp.status().as_u16(), "Readiness probe rejected"),
                Err(e) => trace!(error = %e, "Readiness probe failed"),
            }
            if budget.is_spent() {
                break;
            }
            budget.wait().await;
        }

        warn!(
            attempts = budget.attempts(),
            url = %self.base_url,
            "Engine HTTP server never became ready"
        );
        Err(budget.exhausted())
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.control.is_alive() {
            Ok(())
        } else {
            Err(TransportError::Dead.into())
        }
    }

    async fn request(&self, command: &str) -> Result<reqwest::Response> {
        self.ensure_alive()?;
        validate_command(command)?;

        let resp = match self.client.get(self.command_url(command)).send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.control.mark_dead();
                return Err(e.into());
            }
        };

        let status = resp.status();
        if !status.is_success() {
            self.control.mark_dead();
            return Err(TransportError::Status(status.as_u16()).into());
        }
        Ok(resp)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn control(&self) -> Arc<dyn ProcessControl> {
        self.control.clone()
    }

    async fn send(&mut self, command: &str) -> Result<String> {
        debug!(command, "Sending command over HTTP");
        let body = unless_killed(self.control.as_ref(), async {
            let resp = self.request(command).await?;
            Ok(resp.text().await?)
        })
        .await;
        match body {
            Ok(body) => Ok(body.trim_end().to_string()),
            Err(e) => {
                if e.is_fatal() {
                    self.control.mark_dead();
                }
                Err(e)
            }
        }
    }

    async fn send_streaming(&mut self, command: &str, sink: &mut ChunkSink<'_>) -> Result<u64> {
        debug!(command, "Streaming command over HTTP");
        let streamed = unless_killed(self.control.as_ref(), async {
            let mut resp = self.request(command).await?;
            let mut delivered = 0u64;
            while let Some(chunk) = resp.chunk().await? {
                sink(&chunk)?;
                delivered += chunk.len() as u64;
            }
            Ok(delivered)
        })
        .await;
        if let Err(e) = &streamed {
            if e.is_fatal() {
                self.control.mark_dead();
            }
        }
        streamed
    }

    async fn terminate(&mut self, graceful: bool) {
        let pid = self.control.pid();
        if graceful && self.control.is_alive() {
            let quit = self
                .client
                .get(self.command_url("q"))
                .timeout(self.quit_timeout)
                .send()
                .await;
            if let Err(e) = quit {
                debug!(pid = ?pid, error = %e, "Quit request not acknowledged");
            }
            if let Some(process) = &self.process {
                if !process.wait_exit(self.quit_timeout).await {
                    warn!(pid = ?pid, "Engine ignored quit; killing process group");
                }
            }
        }

        self.control.kill();
        abort_drains(&mut self.drains);
        info!(pid = ?pid, graceful, "HTTP transport terminated");
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        if self.process.is_some() {
            self.control.kill();
        }
        abort_drains(&mut self.drains);
    }
}
