//! The command channel: one engine session, one command at a time.
//!
//! Every operation that touches the transport (`open`, `execute`,
//! `execute_stream`, `close`) runs inside a single async mutex, so two
//! responses can never interleave on the wire. Tokio's mutex queues waiters
//! in FIFO order, which is also the execution order of commands.
//!
//! `interrupt` and `force_close` never take that mutex. They act through the
//! transport's [`ProcessControl`] handle, which is stored beside the mutex,
//! so a hung command can be cancelled or abandoned from any task.

pub mod launcher;
pub mod state;

pub use launcher::{EngineLauncher, Launcher};
pub use state::{ChannelState, SessionInfo};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result, TransportError};
use crate::logging::command_span;
use crate::transport::{LaunchSpec, ProcessControl, Transport, TransportKind};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

struct ActiveSession {
    transport: Box<dyn Transport>,
}

#[derive(Debug, Clone)]
struct SessionMeta {
    kind: TransportKind,
    pid: Option<u32>,
    launch: LaunchSpec,
    version: String,
}

/// Serialized request/response client for one engine session.
///
/// Owned by the application's composition root and shared by `Arc`.
pub struct CommandChannel {
    config: EngineConfig,
    launcher: Arc<dyn Launcher>,
    active: tokio::sync::Mutex<Option<ActiveSession>>,
    control: Mutex<Option<Arc<dyn ProcessControl>>>,
    state: watch::Sender<ChannelState>,
    session_id: AtomicU64,
    connected: AtomicBool,
    dirty: AtomicBool,
    meta: RwLock<Option<SessionMeta>>,
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("session_id", &self.session_id())
            .field("connected", &self.is_connected())
            .field("dirty", &self.is_dirty())
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl CommandChannel {
    /// A disconnected channel that launches the real engine.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_launcher(config, Arc::new(EngineLauncher))
    }

    pub fn with_launcher(config: EngineConfig, launcher: Arc<dyn Launcher>) -> Self {
        let (state, _) = watch::channel(ChannelState::Idle);
        Self {
            config,
            launcher,
            active: tokio::sync::Mutex::new(None),
            control: Mutex::new(None),
            state,
            session_id: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            meta: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open a session on a target file, replacing any current session.
    ///
    /// Returns the new session id.
    pub async fn open(&self, spec: LaunchSpec) -> Result<u64> {
        let mut active = self.active.lock().await;
        self.teardown(&mut active, true).await;
        self.state.send_replace(ChannelState::Idle);

        info!(target = %spec, transport = %self.config.transport, "Opening engine session");
        let mut transport = match self.launcher.launch(&spec, &self.config).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!(error = %e, "Engine launch failed");
                return Err(e);
            }
        };

        // Registered before the probe so a hung probe can be interrupted or killed.
        *self.control.lock() = Some(transport.control());

        let probe = match transport.send(&self.config.probe_command).await {
            Ok(_) if !transport.is_alive() => Err(TransportError::Dead.into()),
            other => other,
        };
        let version = match probe {
            Ok(text) => text.lines().next().unwrap_or_default().trim().to_string(),
            Err(e) => {
                warn!(error = %e, "Engine did not answer the probe command");
                transport.terminate(false).await;
                *self.control.lock() = None;
                return Err(e);
            }
        };

        let id = self.session_id.fetch_add(1, Ordering::SeqCst) + 1;
        *self.meta.write() = Some(SessionMeta {
            kind: transport.kind(),
            pid: transport.pid(),
            launch: spec,
            version,
        });
        info!(session_id = id, pid = ?transport.pid(), kind = %transport.kind(), "Engine session open");

        *active = Some(ActiveSession { transport });
        self.dirty.store(false, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(id)
    }

    /// Open a session with verbatim engine arguments (remote attach, debugger, ...).
    pub async fn open_raw<I, S>(&self, args: I) -> Result<u64>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.open(LaunchSpec::raw(args)).await
    }

    /// Run one command and return its textual result.
    ///
    /// Callers queue on the command section; nothing is reordered or retried.
    pub async fn execute(&self, command: &str) -> Result<String> {
        let mut active = self.active.lock().await;
        self.reap_dead(&mut active).await;
        let session = active.as_mut().ok_or(EngineError::NotConnected)?;

        self.begin(command);
        let result = session
            .transport
            .send(command)
            .instrument(command_span(self.session_id(), command))
            .await;
        let alive = session.transport.is_alive();
        match &result {
            Ok(text) => self.succeed(command, text.clone(), text.len() as u64),
            Err(e) => self.fail(command, e, alive),
        }
        result
    }

    /// Run a command whose result is JSON and decode it.
    pub async fn execute_json<T: DeserializeOwned>(&self, command: &str) -> Result<T> {
        let text = self.execute(command).await?;
        if text.is_empty() {
            return Err(EngineError::CommandFailure {
                command: command.to_string(),
                message: "empty response".to_string(),
            });
        }
        serde_json::from_str(&text).map_err(|e| EngineError::CommandFailure {
            command: command.to_string(),
            message: format!("invalid JSON: {}", e),
        })
    }

    /// Run a command and fold its raw output into `init` piece by piece.
    ///
    /// The command section stays held until the whole response has been
    /// folded, so no other command can interleave with the stream.
    pub async fn execute_stream<T, F>(&self, command: &str, init: T, mut fold: F) -> Result<T>
    where
        T: Send,
        F: FnMut(&mut T, &[u8]) -> Result<()> + Send,
    {
        let mut active = self.active.lock().await;
        self.reap_dead(&mut active).await;
        let session = active.as_mut().ok_or(EngineError::NotConnected)?;

        self.begin(command);
        let mut acc = init;
        let outcome = {
            let mut sink = |chunk: &[u8]| fold(&mut acc, chunk);
            session
                .transport
                .send_streaming(command, &mut sink)
                .instrument(command_span(self.session_id(), command))
                .await
        };
        let alive = session.transport.is_alive();
        match outcome {
            Ok(bytes) => {
                self.succeed(command, String::new(), bytes);
                Ok(acc)
            }
            Err(e) => {
                self.fail(command, &e, alive);
                Err(e)
            }
        }
    }

    /// Ask the engine to abandon its current command.
    ///
    /// Best effort: the in-flight call still returns whatever the engine
    /// produces. Never waits for the command section.
    pub fn interrupt(&self) {
        let control = self.control.lock().clone();
        match control {
            Some(control) => {
                debug!(pid = ?control.pid(), "Interrupt requested");
                control.interrupt();
            }
            None => debug!("Interrupt requested with no session"),
        }
    }

    /// Abandon the session immediately.
    ///
    /// Does not wait for the command section: the process group is killed,
    /// and any in-flight call fails with a transport error and releases the
    /// section on its own.
    pub fn force_close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let control = self.control.lock().take();
        if let Some(control) = control {
            warn!(pid = ?control.pid(), "Force-closing engine session");
            control.kill();
        }
    }

    /// Quit the engine politely, then release the session.
    pub async fn close(&self) {
        let mut active = self.active.lock().await;
        self.teardown(&mut active, true).await;
        self.state.send_replace(ChannelState::Idle);
    }

    /// Current state; never blocks on the command section.
    pub fn state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Id of the most recent successful open; 0 before the first one.
    pub fn session_id(&self) -> u64 {
        self.session_id.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Record that the session's state was persisted.
    pub fn mark_saved(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }

    /// Snapshot of the open session, if any.
    pub fn session(&self) -> Option<SessionInfo> {
        let meta = self.meta.read().clone()?;
        Some(SessionInfo {
            session_id: self.session_id(),
            kind: meta.kind,
            pid: meta.pid,
            connected: self.is_connected(),
            dirty: self.is_dirty(),
            launch: meta.launch,
            version: meta.version,
        })
    }

    fn begin(&self, command: &str) {
        debug!(command, "Executing command");
        self.state.send_replace(ChannelState::Executing {
            command: command.to_string(),
        });
    }

    fn succeed(&self, command: &str, result: String, bytes: u64) {
        debug!(command, bytes, "Command succeeded");
        self.dirty.store(true, Ordering::SeqCst);
        self.state.send_replace(ChannelState::Succeeded {
            command: command.to_string(),
            result,
            bytes,
        });
    }

    fn fail(&self, command: &str, error: &EngineError, alive: bool) {
        if error.is_fatal() || !alive {
            warn!(command, error = %error, "Engine transport lost; session disconnected");
            self.connected.store(false, Ordering::SeqCst);
        } else {
            debug!(command, error = %error, "Command failed");
        }
        self.state.send_replace(ChannelState::Failed {
            command: command.to_string(),
            error: error.to_string(),
        });
    }

    /// Drop a session whose transport died since the last command.
    async fn reap_dead(&self, active: &mut Option<ActiveSession>) {
        let dead = active
            .as_ref()
            .is_some_and(|session| !session.transport.is_alive());
        if dead {
            debug!("Releasing dead engine session");
            self.teardown(active, false).await;
        }
    }

    async fn teardown(&self, active: &mut Option<ActiveSession>, graceful: bool) {
        if let Some(mut session) = active.take() {
            info!(pid = ?session.transport.pid(), graceful, "Closing engine session");
            session.transport.terminate(graceful).await;
        }
        self.connected.store(false, Ordering::SeqCst);
        *self.control.lock() = None;
        *self.meta.write() = None;
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        if let Some(control) = self.control.get_mut().take() {
            control.kill();
        }
    }
}
