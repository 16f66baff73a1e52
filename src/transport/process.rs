//! Engine child processes and their process groups.
//!
//! The engine may run under an intermediate shell wrapper, so signals are
//! delivered to the whole process group rather than the direct child. Each
//! child is spawned as the leader of a fresh group for that reason.

use crate::error::{EngineError, Result};
use crate::logging::log_engine_line;
use crate::transport::ProcessControl;
use parking_lot::Mutex;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Handles of a freshly spawned engine.
pub struct SpawnedEngine {
    pub process: Arc<ProcessGroup>,
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    /// Background tasks draining diagnostic output into the log.
    pub drains: Vec<JoinHandle<()>>,
}

/// Which standard streams the transport keeps for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioPlan {
    /// stdin/stdout carry the protocol; stderr is drained into the log.
    Protocol,
    /// Nothing carries the protocol; stdout and stderr are both drained.
    Detached,
}

/// A child process and the group it leads.
#[derive(Debug)]
pub struct ProcessGroup {
    pid: Option<u32>,
    alive: AtomicBool,
    killed: watch::Sender<bool>,
    child: Mutex<Option<Child>>,
}

impl ProcessGroup {
    /// Launch `program` as the leader of a new process group.
    pub fn spawn(program: &Path, args: &[String], plan: StdioPlan) -> Result<SpawnedEngine> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdin(match plan {
            StdioPlan::Protocol => Stdio::piped(),
            StdioPlan::Detached => Stdio::null(),
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::StartupFailure(format!(
                    "engine executable '{}' not found",
                    program.display()
                ))
            } else {
                EngineError::StartupFailure(format!(
                    "failed to launch '{}': {}",
                    program.display(),
                    e
                ))
            }
        })?;

        let pid = child.id();
        info!(
            pid = ?pid,
            program = %program.display(),
            args = ?args,
            "Engine process started"
        );

        let mut drains = Vec::new();
        if let Some(stderr) = child.stderr.take() {
            drains.push(spawn_log_drain(stderr, pid, "stderr"));
        }

        let stdin = child.stdin.take();
        let stdout = match plan {
            StdioPlan::Protocol => child.stdout.take(),
            StdioPlan::Detached => {
                if let Some(stdout) = child.stdout.take() {
                    drains.push(spawn_log_drain(stdout, pid, "stdout"));
                }
                None
            }
        };

        let process = Arc::new(Self {
            pid,
            alive: AtomicBool::new(true),
            killed: watch::channel(false).0,
            child: Mutex::new(Some(child)),
        });

        Ok(SpawnedEngine {
            process,
            stdin,
            stdout,
            drains,
        })
    }

    /// A control handle with no child behind it, for attaching to an engine
    /// that something else started.
    pub fn detached() -> Arc<Self> {
        Arc::new(Self {
            pid: None,
            alive: AtomicBool::new(true),
            killed: watch::channel(false).0,
            child: Mutex::new(None),
        })
    }

    /// True once the child has been reaped or was never ours.
    pub fn has_exited(&self) -> bool {
        let mut guard = self.child.lock();
        match guard.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(pid = ?self.pid, %status, "Engine process exited");
                    true
                }
                Ok(None) => false,
                Err(_) => true,
            },
            None => self.pid.is_some(),
        }
    }

    /// Wait up to `grace` for the child to exit on its own.
    pub async fn wait_exit(&self, grace: Duration) -> bool {
        if self.child.lock().is_none() {
            return true;
        }
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.has_exited() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    fn signal_group(&self, signal: GroupSignal) {
        let Some(pid) = self.pid else {
            return;
        };
        #[cfg(unix)]
        {
            let sig = match signal {
                GroupSignal::Interrupt => libc::SIGINT,
                GroupSignal::Kill => libc::SIGKILL,
            };
            // SAFETY: killpg has no memory-safety preconditions; a stale pgid only yields ESRCH.
            let rc = unsafe { libc::killpg(pid as libc::pid_t, sig) };
            if rc != 0 {
                debug!(
                    pid,
                    ?signal,
                    error = %std::io::Error::last_os_error(),
                    "Process group signal not delivered"
                );
            }
        }
        #[cfg(not(unix))]
        {
            if signal == GroupSignal::Interrupt {
                warn!(pid, "Interrupt is not supported on this platform");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupSignal {
    Interrupt,
    Kill,
}

impl ProcessControl for ProcessGroup {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn mark_dead(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            warn!(pid = ?self.pid, "Engine transport marked dead");
        }
    }

    fn interrupt(&self) {
        if self.is_alive() {
            debug!(pid = ?self.pid, "Interrupting engine process group");
            self.signal_group(GroupSignal::Interrupt);
        }
    }

    fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.signal_group(GroupSignal::Kill);
        if let Some(child) = self.child.lock().as_mut() {
            let _ = child.start_kill();
        }
        self.killed.send_replace(true);
    }

    fn kill_signal(&self) -> watch::Receiver<bool> {
        self.killed.subscribe()
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if self.child.get_mut().is_some() {
            self.signal_group(GroupSignal::Kill);
        }
    }
}

/// Forward every line of `stream` into the log until EOF.
///
/// The engine blocks once a pipe buffer fills, so diagnostic streams must be
/// drained for the whole session even when nobody reads the log.
pub fn spawn_log_drain<S>(stream: S, pid: Option<u32>, name: &'static str) -> JoinHandle<()>
where
    S: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => log_engine_line(pid, &line),
                Ok(None) => break,
                Err(e) => {
                    debug!(pid = ?pid, stream = name, error = %e, "Engine log drain stopped");
                    break;
                }
            }
        }
        debug!(pid = ?pid, stream = name, "Engine log drain finished");
    })
}

/// Abort drain tasks deterministically at teardown.
pub fn abort_drains(drains: &mut Vec<JoinHandle<()>>) {
    for task in drains.drain(..) {
        task.abort();
    }
}
