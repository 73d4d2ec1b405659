//! Session options, sheet selection and memory profiles

use crate::holder::HolderConfig;
use crate::types::MergeRange;

/// What the read engine does when a cell fails to convert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorPolicy {
    /// Surface the error to the listener and stop
    #[default]
    Abort,
    /// Substitute the field's default value and continue
    UseDefault,
    /// Drop the whole row and continue
    SkipRow,
}

/// Options for a read session
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReadOptions {
    /// Leading rows treated as header (0 = no header)
    pub header_rows: usize,
    pub error_policy: ErrorPolicy,
    /// Skip rows with no content instead of delivering empty rows
    pub ignore_empty_rows: bool,
    /// Trim surrounding whitespace from text cells
    pub auto_trim: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            header_rows: 1,
            error_policy: ErrorPolicy::Abort,
            ignore_empty_rows: true,
            auto_trim: true,
        }
    }
}

/// Options for a write session
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WriteOptions {
    /// Rows buffered before they are flushed to the archive
    pub batch_size: usize,
    /// Emit a header row from field header texts
    pub write_header: bool,
    /// Deflate level 0-9
    pub compression_level: u32,
    /// Trim surrounding whitespace from text values
    pub auto_trim: bool,
    /// Sheet opened when rows are written before any `sheet()` call
    pub default_sheet_name: String,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            batch_size: 1000,
            write_header: true,
            compression_level: 6,
            auto_trim: false,
            default_sheet_name: String::from("Sheet1"),
        }
    }
}

/// Memory profile for different deployment sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MemoryProfile {
    /// Small pods (< 512MB): flush every 100 rows
    Low,
    /// Medium pods (512MB-1GB): flush every 500 rows
    Medium,
    /// Large pods (> 1GB): flush every 1000 rows (default)
    #[default]
    High,
    Custom { batch_size: usize },
}

impl MemoryProfile {
    /// Create profile from memory limit (MB)
    pub fn from_memory_mb(memory_mb: usize) -> Self {
        if memory_mb < 512 {
            MemoryProfile::Low
        } else if memory_mb < 1024 {
            MemoryProfile::Medium
        } else {
            MemoryProfile::High
        }
    }

    /// Detect from environment variable MEMORY_LIMIT_MB
    pub fn from_env() -> Self {
        Self::from_limit(std::env::var("MEMORY_LIMIT_MB").ok().as_deref())
    }

    /// Profile for a MEMORY_LIMIT_MB value; unset or unparsable means `High`
    fn from_limit(limit: Option<&str>) -> Self {
        limit
            .and_then(|s| s.trim().parse::<usize>().ok())
            .map(Self::from_memory_mb)
            .unwrap_or(MemoryProfile::High)
    }

    pub fn batch_size(&self) -> usize {
        match self {
            MemoryProfile::Low => 100,
            MemoryProfile::Medium => 500,
            MemoryProfile::High => 1000,
            MemoryProfile::Custom { batch_size } => (*batch_size).max(1),
        }
    }
}

/// Which sheet to read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetSelector {
    /// 0-based position in the workbook
    Index(usize),
    Name(String),
}

/// One sheet to read, with sheet-level overrides
#[derive(Debug, Clone)]
pub struct ReadSheet {
    pub(crate) selector: SheetSelector,
    pub(crate) header_rows: Option<usize>,
    pub(crate) config: HolderConfig,
}

impl ReadSheet {
    pub fn index(index: usize) -> Self {
        ReadSheet {
            selector: SheetSelector::Index(index),
            header_rows: None,
            config: HolderConfig::default(),
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        ReadSheet {
            selector: SheetSelector::Name(name.into()),
            header_rows: None,
            config: HolderConfig::default(),
        }
    }

    /// Header rows for this sheet only
    pub fn header_rows(mut self, rows: usize) -> Self {
        self.header_rows = Some(rows);
        self
    }

    /// Converter, format and flag overrides for this sheet
    pub fn config(mut self, config: HolderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn selector(&self) -> &SheetSelector {
        &self.selector
    }
}

impl From<usize> for ReadSheet {
    fn from(index: usize) -> Self {
        ReadSheet::index(index)
    }
}

impl From<&str> for ReadSheet {
    fn from(name: &str) -> Self {
        ReadSheet::name(name)
    }
}

impl From<String> for ReadSheet {
    fn from(name: String) -> Self {
        ReadSheet::name(name)
    }
}

/// One sheet to write, with sheet-level overrides and merged areas
#[derive(Debug, Clone)]
pub struct WriteSheet {
    pub(crate) name: String,
    pub(crate) config: HolderConfig,
    pub(crate) merges: Vec<MergeRange>,
}

impl WriteSheet {
    pub fn new(name: impl Into<String>) -> Self {
        WriteSheet {
            name: name.into(),
            config: HolderConfig::default(),
            merges: Vec::new(),
        }
    }

    pub fn config(mut self, config: HolderConfig) -> Self {
        self.config = config;
        self
    }

    /// Merged area written with the sheet
    pub fn merge(mut self, range: MergeRange) -> Self {
        self.merges.push(range);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl From<&str> for WriteSheet {
    fn from(name: &str) -> Self {
        WriteSheet::new(name)
    }
}

impl From<String> for WriteSheet {
    fn from(name: String) -> Self {
        WriteSheet::new(name)
    }
}
