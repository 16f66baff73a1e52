//! [`Repository`] backed by engine commands.

use crate::channel::CommandChannel;
use crate::core::{BinaryInfo, FunctionInfo, Instruction, Section, SectionListing};
use crate::error::{EngineError, Result};
use crate::repository::Repository;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Translates repository reads into engine commands on a shared channel.
#[derive(Debug, Clone)]
pub struct EngineRepository {
    channel: Arc<CommandChannel>,
}

impl EngineRepository {
    pub fn new(channel: Arc<CommandChannel>) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &Arc<CommandChannel> {
        &self.channel
    }
}

/// Decode `p8` output; the engine may wrap long dumps across lines.
pub(crate) fn decode_hex_dump(command: &str, text: &str) -> Result<Vec<u8>> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&digits).map_err(|e| EngineError::CommandFailure {
        command: command.to_string(),
        message: format!("invalid hex dump: {}", e),
    })
}

#[async_trait]
impl Repository for EngineRepository {
    fn session_id(&self) -> u64 {
        self.channel.session_id()
    }

    async fn fetch_bytes(&self, address: u64, length: u64) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let command = format!("p8 {} @ {:#x}", length, address);
        let text = self.channel.execute(&command).await?;
        let mut bytes = decode_hex_dump(&command, &text)?;
        bytes.truncate(usize::try_from(length).unwrap_or(usize::MAX));
        debug!(address, requested = length, got = bytes.len(), "Fetched bytes");
        Ok(bytes)
    }

    async fn fetch_instructions(&self, address: u64, count: usize) -> Result<Vec<Instruction>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let command = format!("pdj {} @ {:#x}", count, address);
        let instructions: Vec<Instruction> = self.channel.execute_json(&command).await?;
        debug!(address, requested = count, got = instructions.len(), "Fetched instructions");
        Ok(instructions)
    }

    async fn function_start(&self, address: u64) -> Result<u64> {
        let command = format!("afij @ {:#x}", address);
        let text = self.channel.execute(&command).await?;
        if text.is_empty() {
            return Ok(address);
        }
        let functions: Vec<FunctionInfo> =
            serde_json::from_str(&text).map_err(|e| EngineError::CommandFailure {
                command,
                message: format!("invalid JSON: {}", e),
            })?;
        Ok(functions.first().map_or(address, |f| f.address))
    }

    async fn sections(&self) -> Result<Vec<Section>> {
        let listing: SectionListing = self.channel.execute_json("iSj").await?;
        Ok(listing.into_sections())
    }

    async fn file_size(&self) -> Result<Option<u64>> {
        let info: BinaryInfo = self.channel.execute_json("ij").await?;
        Ok(info.file_size())
    }
}
