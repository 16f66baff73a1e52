//! The data source behind the view caches.
//!
//! Views never talk to a transport. They go through [`Repository`], which
//! [`EngineRepository`] implements on top of the command channel, so every
//! view fetch inherits the channel's one-command-at-a-time discipline.

pub mod engine;
pub mod memory;

pub use engine::EngineRepository;
pub use memory::MemoryRepository;

use crate::core::{Instruction, Section};
use crate::error::Result;
use async_trait::async_trait;

/// Narrow read interface the hex and disassembly views consume.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Session the data currently comes from; changes whenever the engine is reopened.
    fn session_id(&self) -> u64;

    /// Up to `length` bytes starting at `address`.
    async fn fetch_bytes(&self, address: u64, length: u64) -> Result<Vec<u8>>;

    /// Up to `count` consecutive instructions starting at `address`.
    async fn fetch_instructions(&self, address: u64, count: usize) -> Result<Vec<Instruction>>;

    /// Start of the function containing `address`, or `address` itself.
    async fn function_start(&self, address: u64) -> Result<u64>;

    async fn sections(&self) -> Result<Vec<Section>>;

    /// Size of the backing file, when known.
    async fn file_size(&self) -> Result<Option<u64>>;
}
