//! Section type for file-format organizational units.
//!
//! Sections as reported by the engine's section listing. They are the
//! primary source of the virtual address range a view covers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Permission flags for sections (simplified bit operations)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SectionPerms {
    /// Raw permission bits: read=1, write=2, execute=4
    pub bits: u8,
}

impl SectionPerms {
    pub fn new(read: bool, write: bool, execute: bool) -> Self {
        let mut bits = 0u8;
        if read {
            bits |= 1;
        }
        if write {
            bits |= 2;
        }
        if execute {
            bits |= 4;
        }
        Self { bits }
    }

    /// Parse an `rwx`-style string (`-r-x`, `r-x`, ...).
    pub fn parse(text: &str) -> Self {
        Self::new(text.contains('r'), text.contains('w'), text.contains('x'))
    }

    pub fn has_read(&self) -> bool {
        (self.bits & 1) != 0
    }

    pub fn has_write(&self) -> bool {
        (self.bits & 2) != 0
    }

    pub fn has_execute(&self) -> bool {
        (self.bits & 4) != 0
    }
}

impl fmt::Display for SectionPerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut perms = String::new();
        perms.push(if self.has_read() { 'r' } else { '-' });
        perms.push(if self.has_write() { 'w' } else { '-' });
        perms.push(if self.has_execute() { 'x' } else { '-' });
        write!(f, "{}", perms)
    }
}

fn default_perm() -> String {
    "----".to_string()
}

/// One mapped section.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Section {
    /// Section name (e.g., ".text", ".data")
    #[serde(default)]
    pub name: String,
    /// Virtual address where the section is mapped
    #[serde(default)]
    pub vaddr: u64,
    /// Size in memory
    #[serde(default)]
    pub vsize: u64,
    /// File offset where section data begins
    #[serde(default)]
    pub paddr: u64,
    /// Size on disk
    #[serde(default)]
    pub size: u64,
    /// Permission string as the engine prints it
    #[serde(default = "default_perm")]
    pub perm: String,
}

impl Section {
    pub fn new(name: impl Into<String>, vaddr: u64, vsize: u64) -> Self {
        Self {
            name: name.into(),
            vaddr,
            vsize,
            paddr: 0,
            size: vsize,
            perm: default_perm(),
        }
    }

    pub fn perms(&self) -> SectionPerms {
        SectionPerms::parse(&self.perm)
    }

    /// End of the mapped range (exclusive), saturating at `u64::MAX`.
    pub fn vend(&self) -> u64 {
        self.vaddr.saturating_add(self.vsize)
    }

    /// Sections with no memory footprint do not contribute to a view range.
    pub fn is_mapped(&self) -> bool {
        self.vsize > 0
    }

    pub fn is_executable(&self) -> bool {
        self.perms().has_execute()
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:#x}..{:#x}) {}",
            self.name,
            self.vaddr,
            self.vend(),
            self.perms()
        )
    }
}

/// The engine has printed the section listing both as a bare array and
/// wrapped in an object, depending on version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SectionListing {
    Bare(Vec<Section>),
    Wrapped {
        #[serde(default)]
        sections: Vec<Section>,
    },
}

impl SectionListing {
    pub fn into_sections(self) -> Vec<Section> {
        match self {
            SectionListing::Bare(v) => v,
            SectionListing::Wrapped { sections } => sections,
        }
    }
}
