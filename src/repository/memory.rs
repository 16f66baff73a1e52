//! In-memory [`Repository`] over a flat byte image.
//!
//! Serves views without an engine: offline snapshots, benchmarks and tests.
//! Fetch counters, an adjustable latency and a failure switch make cache
//! behaviour observable.

use crate::core::{FunctionInfo, Instruction, InstructionKind, Section};
use crate::error::{EngineError, Result};
use crate::repository::Repository;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug)]
pub struct MemoryRepository {
    base: u64,
    image: RwLock<Vec<u8>>,
    instructions: RwLock<BTreeMap<u64, Instruction>>,
    functions: RwLock<Vec<FunctionInfo>>,
    sections: RwLock<Vec<Section>>,
    file_size: RwLock<Option<u64>>,
    session_id: AtomicU64,
    failing: AtomicBool,
    latency: RwLock<Option<Duration>>,
    byte_fetches: AtomicUsize,
    instruction_fetches: AtomicUsize,
}

impl MemoryRepository {
    /// An image mapped at `base`, described by one section covering it.
    pub fn new(base: u64, image: Vec<u8>) -> Self {
        let len = image.len() as u64;
        Self {
            base,
            image: RwLock::new(image),
            instructions: RwLock::new(BTreeMap::new()),
            functions: RwLock::new(Vec::new()),
            sections: RwLock::new(vec![Section::new("image", base, len)]),
            file_size: RwLock::new(Some(len).filter(|l| *l > 0)),
            session_id: AtomicU64::new(1),
            failing: AtomicBool::new(false),
            latency: RwLock::new(None),
            byte_fetches: AtomicUsize::new(0),
            instruction_fetches: AtomicUsize::new(0),
        }
    }

    /// Replace the section table.
    pub fn with_sections(self, sections: Vec<Section>) -> Self {
        *self.sections.write() = sections;
        self
    }

    pub fn with_file_size(self, size: Option<u64>) -> Self {
        *self.file_size.write() = size;
        self
    }

    pub fn with_instructions(self, instructions: Vec<Instruction>) -> Self {
        *self.instructions.write() = instructions
            .into_iter()
            .map(|ins| (ins.address, ins))
            .collect();
        self
    }

    /// Decode the whole image as instructions of `width` bytes each.
    pub fn with_uniform_instructions(self, width: u64) -> Self {
        let width = width.max(1);
        let decoded: Vec<Instruction> = {
            let image = self.image.read();
            image
                .chunks(width as usize)
                .enumerate()
                .map(|(i, raw)| {
                    let mut ins = Instruction::invalid(self.base + i as u64 * width);
                    ins.size = raw.len() as u64;
                    ins.bytes = hex::encode(raw);
                    ins.opcode = format!("db {}", ins.bytes);
                    ins.disasm = ins.opcode.clone();
                    ins.kind = InstructionKind::Other("db".to_string());
                    ins
                })
                .collect()
        };
        self.with_instructions(decoded)
    }

    pub fn with_functions(self, functions: Vec<FunctionInfo>) -> Self {
        *self.functions.write() = functions;
        self
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// Overwrite bytes in place, as a patch command would.
    pub fn write(&self, address: u64, data: &[u8]) {
        let mut image = self.image.write();
        let Some(offset) = address.checked_sub(self.base) else {
            return;
        };
        let offset = offset as usize;
        if offset >= image.len() {
            return;
        }
        let end = (offset + data.len()).min(image.len());
        image[offset..end].copy_from_slice(&data[..end - offset]);
    }

    /// Replace the instruction at `ins.address`.
    pub fn write_instruction(&self, ins: Instruction) {
        self.instructions.write().insert(ins.address, ins);
    }

    /// Simulate the engine being reopened.
    pub fn set_session_id(&self, id: u64) {
        self.session_id.store(id, Ordering::SeqCst);
    }

    /// Make every fetch fail until switched off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every fetch by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    pub fn byte_fetches(&self) -> usize {
        self.byte_fetches.load(Ordering::SeqCst)
    }

    pub fn instruction_fetches(&self) -> usize {
        self.instruction_fetches.load(Ordering::SeqCst)
    }

    async fn simulate(&self, command: &str) -> Result<()> {
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(EngineError::CommandFailure {
                command: command.to_string(),
                message: "simulated failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    fn session_id(&self) -> u64 {
        self.session_id.load(Ordering::SeqCst)
    }

    async fn fetch_bytes(&self, address: u64, length: u64) -> Result<Vec<u8>> {
        self.byte_fetches.fetch_add(1, Ordering::SeqCst);
        self.simulate("fetch_bytes").await?;

        let image = self.image.read();
        let Some(offset) = address.checked_sub(self.base) else {
            return Ok(Vec::new());
        };
        let len = image.len() as u64;
        if offset >= len {
            return Ok(Vec::new());
        }
        let end = offset.saturating_add(length).min(len);
        Ok(image[offset as usize..end as usize].to_vec())
    }

    async fn fetch_instructions(&self, address: u64, count: usize) -> Result<Vec<Instruction>> {
        self.instruction_fetches.fetch_add(1, Ordering::SeqCst);
        self.simulate("fetch_instructions").await?;

        Ok(self
            .instructions
            .read()
            .range(address..)
            .take(count)
            .map(|(_, ins)| ins.clone())
            .collect())
    }

    async fn function_start(&self, address: u64) -> Result<u64> {
        self.simulate("function_start").await?;
        Ok(self
            .functions
            .read()
            .iter()
            .find(|f| f.contains(address))
            .map_or(address, |f| f.address))
    }

    async fn sections(&self) -> Result<Vec<Section>> {
        self.simulate("sections").await?;
        Ok(self.sections.read().clone())
    }

    async fn file_size(&self) -> Result<Option<u64>> {
        self.simulate("file_size").await?;
        Ok(*self.file_size.read())
    }
}
