//! Common test utilities and helpers.
//!
//! This module provides an in-process fake engine and a scripted transport
//! so channel and view behaviour can be tested without the real engine.

#![allow(dead_code)]

pub mod test_utils;

use async_trait::async_trait;
use enginelink::channel::Launcher;
use enginelink::error::{EngineError, Result, TransportError};
use enginelink::transport::{ChunkSink, LaunchSpec, ProcessControl, Transport, TransportKind};
use enginelink::EngineConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Command that blocks until the transport is killed.
pub const HANG: &str = "hang";
/// Command that takes a little while, to let callers pile up.
pub const SLOW: &str = "slow";

/// A byte image with just enough engine command semantics for the views.
#[derive(Debug)]
pub struct FakeEngine {
    pub base: u64,
    pub image: Mutex<Vec<u8>>,
    /// Every command handled, in arrival order.
    pub log: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn new(base: u64, len: usize) -> Arc<Self> {
        Arc::new(Self {
            base,
            image: Mutex::new((0..len).map(|i| (i % 251) as u8).collect()),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn bytes_at(&self, address: u64, len: usize) -> Vec<u8> {
        let image = self.image.lock();
        let start = (address - self.base) as usize;
        image[start..(start + len).min(image.len())].to_vec()
    }

    pub fn handle(&self, command: &str) -> Result<String> {
        self.log.lock().push(command.to_string());
        let mut parts = command.split_whitespace();
        let verb = parts.next().unwrap_or_default();
        let arg = parts.next().unwrap_or_default();
        let address = command
            .split_once('@')
            .and_then(|(_, a)| parse_address(a.trim()));
        let len = self.image.lock().len() as u64;

        match verb {
            "?V" => Ok("5.9.8 0 @ linux-x86-64".to_string()),
            "iSj" => Ok(format!(
                r#"[{{"name":".text","vaddr":{},"vsize":{},"paddr":0,"size":{},"perm":"-r-x"}}]"#,
                self.base, len, len
            )),
            "ij" => Ok(format!(r#"{{"core":{{"file":"fake","size":{}}}}}"#, len)),
            "afij" => Ok("[]".to_string()),
            "p8" => {
                let count: u64 = arg.parse().unwrap_or(0);
                let address = address.unwrap_or(self.base);
                Ok(hex::encode(self.slice(address, count)))
            }
            "pdj" => {
                let count: u64 = arg.parse().unwrap_or(0);
                let address = address.unwrap_or(self.base);
                let end = self.base + len;
                let rows: Vec<String> = (0..count)
                    .map(|i| address + i * 4)
                    .filter(|a| *a >= self.base && *a < end)
                    .map(|a| {
                        format!(
                            r#"{{"offset":{},"size":4,"opcode":"nop","bytes":"{}","type":"nop"}}"#,
                            a,
                            hex::encode(self.slice(a, 4))
                        )
                    })
                    .collect();
                Ok(format!("[{}]", rows.join(",")))
            }
            "wx" => {
                let data = hex::decode(arg).map_err(|e| EngineError::InvalidInput(e.to_string()))?;
                let address = address.unwrap_or(self.base);
                let mut image = self.image.lock();
                let start = (address - self.base) as usize;
                for (i, b) in data.iter().enumerate() {
                    if let Some(slot) = image.get_mut(start + i) {
                        *slot = *b;
                    }
                }
                Ok(String::new())
            }
            _ => Ok(String::new()),
        }
    }

    fn slice(&self, address: u64, count: u64) -> Vec<u8> {
        let image = self.image.lock();
        let Some(start) = address.checked_sub(self.base) else {
            return Vec::new();
        };
        let start = start as usize;
        if start >= image.len() {
            return Vec::new();
        }
        let end = (start + count as usize).min(image.len());
        image[start..end].to_vec()
    }
}

fn parse_address(text: &str) -> Option<u64> {
    match text.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Process control without a process: kill flips a watch the transport waits on.
#[derive(Debug)]
pub struct MockControl {
    alive: AtomicBool,
    killed: watch::Sender<bool>,
    pub interrupts: AtomicUsize,
}

impl MockControl {
    pub fn new() -> Arc<Self> {
        let (killed, _) = watch::channel(false);
        Arc::new(Self {
            alive: AtomicBool::new(true),
            killed,
            interrupts: AtomicUsize::new(0),
        })
    }

    pub fn was_killed(&self) -> bool {
        *self.killed.borrow()
    }
}

impl ProcessControl for MockControl {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
    }

    fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.killed.send_replace(true);
    }

    fn kill_signal(&self) -> watch::Receiver<bool> {
        self.killed.subscribe()
    }
}

/// Counts how many commands are inside a transport at once.
#[derive(Debug, Default)]
pub struct Concurrency {
    current: AtomicUsize,
    pub peak: AtomicUsize,
    pub total: AtomicUsize,
}

impl Concurrency {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockTransport {
    engine: Arc<FakeEngine>,
    control: Arc<MockControl>,
    concurrency: Arc<Concurrency>,
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn control(&self) -> Arc<dyn ProcessControl> {
        self.control.clone()
    }

    async fn send(&mut self, command: &str) -> Result<String> {
        if !self.control.is_alive() {
            return Err(TransportError::Dead.into());
        }
        self.concurrency.enter();
        let result = match command {
            HANG => {
                let mut killed = self.control.killed.subscribe();
                let _ = killed.wait_for(|k| *k).await;
                Err(TransportError::UnexpectedEof.into())
            }
            SLOW => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok("done".to_string())
            }
            other => {
                tokio::task::yield_now().await;
                self.engine.handle(other)
            }
        };
        self.concurrency.leave();
        if matches!(&result, Err(e) if e.is_fatal()) {
            self.control.mark_dead();
        }
        result
    }

    async fn send_streaming(&mut self, command: &str, sink: &mut ChunkSink<'_>) -> Result<u64> {
        let text = self.send(command).await?;
        let mut total = 0;
        for piece in text.as_bytes().chunks(7) {
            sink(piece)?;
            total += piece.len() as u64;
        }
        Ok(total)
    }

    async fn terminate(&mut self, _graceful: bool) {
        self.control.kill();
    }
}

/// Hands out [`MockTransport`]s over one shared fake engine.
pub struct MockLauncher {
    pub engine: Arc<FakeEngine>,
    pub concurrency: Arc<Concurrency>,
    pub launches: AtomicUsize,
    pub controls: Mutex<Vec<Arc<MockControl>>>,
    pub fail_launch: AtomicBool,
}

impl MockLauncher {
    pub fn new(engine: Arc<FakeEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            concurrency: Arc::new(Concurrency::default()),
            launches: AtomicUsize::new(0),
            controls: Mutex::new(Vec::new()),
            fail_launch: AtomicBool::new(false),
        })
    }

    pub fn last_control(&self) -> Option<Arc<MockControl>> {
        self.controls.lock().last().cloned()
    }
}

#[async_trait]
impl Launcher for MockLauncher {
    async fn launch(&self, _spec: &LaunchSpec, _config: &EngineConfig) -> Result<Box<dyn Transport>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(EngineError::StartupFailure("mock launch refused".to_string()));
        }
        let control = MockControl::new();
        self.controls.lock().push(control.clone());
        Ok(Box::new(MockTransport {
            engine: self.engine.clone(),
            control,
            concurrency: self.concurrency.clone(),
        }))
    }
}

/// A channel over a fresh fake engine, not yet opened.
pub fn mock_channel(base: u64, len: usize) -> (Arc<enginelink::CommandChannel>, Arc<MockLauncher>) {
    let launcher = MockLauncher::new(FakeEngine::new(base, len));
    let channel = Arc::new(enginelink::CommandChannel::with_launcher(
        EngineConfig::default(),
        launcher.clone(),
    ));
    (channel, launcher)
}
