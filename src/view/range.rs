//! The virtual address window a view covers.

use crate::core::Section;
use crate::error::{EngineError, Result};
use crate::repository::Repository;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Half-open address range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewRange {
    pub start: u64,
    pub end: u64,
}

/// Where a resolved range came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeSource {
    /// Span of the mapped sections
    Sections,
    /// Raw length of the backing file
    FileSize,
    /// Nothing was known; the fixed default span
    Default,
}

impl ViewRange {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(EngineError::InvalidInput(format!(
                "view range start {:#x} is above its end {:#x}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn span(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }

    /// Nearest address inside the range; `start` for an empty range.
    pub fn clamp(&self, address: u64) -> u64 {
        if self.is_empty() {
            self.start
        } else {
            address.clamp(self.start, self.end - 1)
        }
    }

    /// Pick the range from whatever metadata is available. Never fails.
    pub fn resolve(
        sections: &[Section],
        file_size: Option<u64>,
        default_span: u64,
    ) -> (Self, RangeSource) {
        let mapped = sections.iter().filter(|s| s.is_mapped());
        let bounds = mapped.fold(None, |acc: Option<(u64, u64)>, s| match acc {
            None => Some((s.vaddr, s.vend())),
            Some((lo, hi)) => Some((lo.min(s.vaddr), hi.max(s.vend()))),
        });

        if let Some((start, end)) = bounds {
            return (Self { start, end }, RangeSource::Sections);
        }
        if let Some(size) = file_size.filter(|s| *s > 0) {
            return (Self { start: 0, end: size }, RangeSource::FileSize);
        }
        (
            Self {
                start: 0,
                end: default_span,
            },
            RangeSource::Default,
        )
    }

    /// Ask the repository for sections, then the file size, then fall back.
    ///
    /// Repository errors are logged and treated as missing metadata.
    pub async fn discover(repo: &dyn Repository, default_span: u64) -> (Self, RangeSource) {
        let sections = match repo.sections().await {
            Ok(sections) => sections,
            Err(e) => {
                warn!(error = %e, "Section listing unavailable");
                Vec::new()
            }
        };

        let file_size = if sections.iter().any(Section::is_mapped) {
            None
        } else {
            match repo.file_size().await {
                Ok(size) => size,
                Err(e) => {
                    warn!(error = %e, "File size unavailable");
                    None
                }
            }
        };

        let (range, source) = Self::resolve(&sections, file_size, default_span);
        debug!(%range, ?source, "Resolved view range");
        (range, source)
    }
}

impl fmt::Display for ViewRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.start, self.end)
    }
}
