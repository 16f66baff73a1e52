//! Whole-file information from the engine's info command.

use serde::{Deserialize, Serialize};

/// File-level facts about the opened target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryInfo {
    #[serde(default)]
    pub core: CoreInfo,
    #[serde(default)]
    pub bin: Option<BinInfo>,
}

/// The `core` block: what was opened and how large it is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreInfo {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub format: Option<String>,
}

/// The `bin` block: architecture details of a recognised format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinInfo {
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default)]
    pub bits: Option<u32>,
    #[serde(default)]
    pub endian: Option<String>,
}

impl BinaryInfo {
    /// Raw length of the backing file, if the engine knows it.
    pub fn file_size(&self) -> Option<u64> {
        self.core.size.filter(|s| *s > 0)
    }
}
