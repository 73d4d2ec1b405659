//! Row-level access to OOXML spreadsheet packages
//!
//! The engines only see [`SheetSource`] and [`SheetSink`]: ordered streams of
//! raw rows. [`XlsxSource`] and [`XlsxSink`] implement them over `s-zip`.

mod reader;
pub mod shared_strings;
mod writer;
pub(crate) mod xml;

pub use reader::{RowIterator, XlsxSource};
pub use writer::XlsxSink;

use crate::error::Result;
use crate::types::{CellStyle, CellValue, MergeRange};

/// One worksheet of a workbook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetInfo {
    pub name: String,
    /// Part name inside the package, e.g. `xl/worksheets/sheet1.xml`
    pub path: String,
}

/// One positioned cell
#[derive(Debug, Clone, PartialEq)]
pub struct SheetCell {
    /// 0-based column
    pub col: u32,
    pub value: CellValue,
    pub style: CellStyle,
}

impl SheetCell {
    pub fn new(col: u32, value: CellValue) -> Self {
        SheetCell {
            col,
            value,
            style: CellStyle::Default,
        }
    }

    pub fn styled(col: u32, value: CellValue, style: CellStyle) -> Self {
        SheetCell { col, value, style }
    }
}

/// One row: 0-based index and its non-empty cells in column order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SheetRow {
    pub index: u32,
    pub cells: Vec<SheetCell>,
}

impl SheetRow {
    pub fn new(index: u32) -> Self {
        SheetRow {
            index,
            cells: Vec::new(),
        }
    }

    /// True when the row carries no content
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.value.is_empty())
    }

    /// Highest column index + 1
    pub fn width(&self) -> u32 {
        self.cells.iter().map(|c| c.col + 1).max().unwrap_or(0)
    }
}

pub type SheetRows<'a> = Box<dyn Iterator<Item = Result<SheetRow>> + 'a>;

/// Ordered row stream over the sheets of a document
pub trait SheetSource {
    fn sheets(&self) -> &[SheetInfo];

    /// Whether date serials use the 1904 system
    fn date1904(&self) -> bool {
        false
    }

    /// Rows of sheet `index` in ascending row order; rows absent from the
    /// document are absent from the stream
    fn rows(&mut self, index: usize) -> Result<SheetRows<'_>>;
}

/// Ordered row sink producing a document
pub trait SheetSink {
    fn start_sheet(&mut self, name: &str) -> Result<()>;

    /// Append rows; indices must be strictly ascending across calls
    fn write_rows(&mut self, rows: &[SheetRow]) -> Result<()>;

    fn finish_sheet(&mut self, merges: &[MergeRange]) -> Result<()>;

    /// Write the remaining package parts; the sink is unusable afterwards
    fn close(&mut self) -> Result<()>;
}
