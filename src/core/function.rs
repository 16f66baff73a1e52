//! Function records from the engine's function listing.

use serde::{Deserialize, Serialize};

/// A function the engine has analysed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    /// Entry address
    #[serde(rename = "offset", alias = "addr", default)]
    pub address: u64,
    #[serde(default)]
    pub name: String,
    /// Linear size in bytes
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub nbbs: u64,
}

impl FunctionInfo {
    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address < self.address.saturating_add(self.size.max(1))
    }
}
