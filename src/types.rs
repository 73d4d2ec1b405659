//! Type definitions for raw cell data

use crate::error::{ExcelError, Result};
use std::fmt;

/// Raw, format-level classification of a cell's content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CellKind {
    /// No content
    Empty,
    /// Shared string
    String,
    /// Inline string written directly into the cell
    DirectString,
    /// String made of formatted runs
    RichString,
    /// Numeric value (also used for date serials)
    Number,
    /// Boolean value
    Boolean,
    /// Formula, optionally with its last cached result
    Formula,
    /// Error code such as `#DIV/0!`
    Error,
    /// Embedded picture data
    Image,
}

impl CellKind {
    /// Kind used when looking up converters registered for a broader kind.
    ///
    /// Inline and rich strings fall back to shared-string converters.
    pub fn lookup_fallback(self) -> Option<CellKind> {
        match self {
            CellKind::DirectString | CellKind::RichString => Some(CellKind::String),
            _ => None,
        }
    }
}

impl fmt::Display for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Cell style presets the writer knows how to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CellStyle {
    /// Default style - no formatting
    #[default]
    Default = 0,
    /// Date format (MM/DD/YYYY)
    Date = 1,
    /// DateTime format (MM/DD/YYYY HH:MM)
    DateTime = 2,
}

impl CellStyle {
    /// Get the style index for XML
    pub fn index(&self) -> u32 {
        *self as u32
    }
}

static EMPTY: CellValue = CellValue::Empty;

/// One cell's raw content. The variant is the kind; the payload always matches it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    /// Empty cell
    #[default]
    Empty,
    /// Shared string
    String(String),
    /// Inline string
    DirectString(String),
    /// Rich text, one entry per run
    RichString(Vec<String>),
    /// Numeric value
    Number(f64),
    /// Boolean value
    Boolean(bool),
    /// Formula text (without leading '=') and the cached result, if any
    Formula {
        formula: String,
        cached: Option<Box<CellValue>>,
    },
    /// Error code
    Error(String),
    /// Image bytes
    Image(Vec<u8>),
}

impl CellValue {
    /// Declared kind of this cell
    pub fn kind(&self) -> CellKind {
        match self {
            CellValue::Empty => CellKind::Empty,
            CellValue::String(_) => CellKind::String,
            CellValue::DirectString(_) => CellKind::DirectString,
            CellValue::RichString(_) => CellKind::RichString,
            CellValue::Number(_) => CellKind::Number,
            CellValue::Boolean(_) => CellKind::Boolean,
            CellValue::Formula { .. } => CellKind::Formula,
            CellValue::Error(_) => CellKind::Error,
            CellValue::Image(_) => CellKind::Image,
        }
    }

    /// Formula cell with a cached result
    pub fn formula(formula: impl Into<String>, cached: Option<CellValue>) -> Self {
        CellValue::Formula {
            formula: formula.into(),
            cached: cached.map(Box::new),
        }
    }

    /// The value a converter should see: a formula's cached result, or the cell itself
    pub fn effective(&self) -> &CellValue {
        match self {
            CellValue::Formula {
                cached: Some(cached),
                ..
            } => cached.effective(),
            CellValue::Formula { cached: None, .. } => &EMPTY,
            other => other,
        }
    }

    /// Check if cell is empty
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::String(s) | CellValue::DirectString(s) => s.is_empty(),
            CellValue::RichString(runs) => runs.iter().all(|r| r.is_empty()),
            _ => false,
        }
    }

    /// Text content of string-like cells
    pub fn text(&self) -> Option<String> {
        match self {
            CellValue::String(s) | CellValue::DirectString(s) => Some(s.clone()),
            CellValue::RichString(runs) => Some(runs.concat()),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::String(s) | CellValue::DirectString(s) => f.write_str(s),
            CellValue::RichString(runs) => runs.iter().try_for_each(|r| f.write_str(r)),
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Boolean(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            CellValue::Formula { formula, .. } => write!(f, "={}", formula),
            CellValue::Error(e) => f.write_str(e),
            CellValue::Image(bytes) => write!(f, "<image {} bytes>", bytes.len()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::String(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::String(s)
    }
}

impl From<f64> for CellValue {
    fn from(f: f64) -> Self {
        CellValue::Number(f)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Boolean(b)
    }
}

/// Rectangular merged area, 0-based and inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeRange {
    pub first_row: u32,
    pub last_row: u32,
    pub first_col: u32,
    pub last_col: u32,
}

impl MergeRange {
    /// Create a merge range; corners may be given in any order
    pub fn new(first_row: u32, first_col: u32, last_row: u32, last_col: u32) -> Self {
        MergeRange {
            first_row: first_row.min(last_row),
            last_row: first_row.max(last_row),
            first_col: first_col.min(last_col),
            last_col: first_col.max(last_col),
        }
    }

    /// Parse an A1-style range such as `"A1:C2"`
    pub fn parse(range: &str) -> Result<Self> {
        let (start, end) = range
            .split_once(':')
            .ok_or_else(|| ExcelError::Configuration(format!("Invalid merge range: {}", range)))?;
        let (r1, c1) = parse_cell_reference(start)
            .ok_or_else(|| ExcelError::Configuration(format!("Invalid cell reference: {}", start)))?;
        let (r2, c2) = parse_cell_reference(end)
            .ok_or_else(|| ExcelError::Configuration(format!("Invalid cell reference: {}", end)))?;
        Ok(MergeRange::new(r1, c1, r2, c2))
    }

    /// A1-style reference, e.g. `"A1:C2"`
    pub fn reference(&self) -> String {
        format!(
            "{}{}:{}{}",
            column_letter(self.first_col),
            self.first_row + 1,
            column_letter(self.last_col),
            self.last_row + 1
        )
    }
}

/// Highest zero-based column a worksheet may address (XFD)
pub const MAX_COLUMN: u32 = 16_383;

/// Convert column index to Excel letter (0 -> A, 25 -> Z, 26 -> AA)
pub fn column_letter(col: u32) -> String {
    let mut buf = Vec::with_capacity(3);
    push_column_letter(&mut buf, col);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Append the letters of a 0-based column index to a byte buffer
pub(crate) fn push_column_letter(buffer: &mut Vec<u8>, col: u32) {
    let mut n = col + 1;
    let mut tmp = [0u8; 10];
    let mut len = 0;
    while n > 0 {
        let rem = (n - 1) % 26;
        tmp[len] = b'A' + rem as u8;
        len += 1;
        n = (n - 1) / 26;
    }
    for i in (0..len).rev() {
        buffer.push(tmp[i]);
    }
}

/// Parse a cell reference into 0-based (row, column), e.g. `"B3"` -> (2, 1)
pub fn parse_cell_reference(cell_ref: &str) -> Option<(u32, u32)> {
    let cell_ref = cell_ref.trim().trim_start_matches('$');
    let split = cell_ref.find(|c: char| !c.is_ascii_alphabetic())?;
    let (letters, digits) = cell_ref.split_at(split);
    if letters.is_empty() {
        return None;
    }
    let col = parse_column_index(letters)?;
    let row: u32 = digits.trim_start_matches('$').parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((row - 1, col))
}

/// Parse the column part of a reference ("A1" -> 0, "AA7" -> 26); stops at the first digit
pub fn parse_column_index(cell_ref: &str) -> Option<u32> {
    let mut col_idx = 0u32;
    let mut seen = false;
    for ch in cell_ref.chars() {
        if ch.is_ascii_alphabetic() {
            seen = true;
            col_idx = col_idx
                .checked_mul(26)?
                .checked_add(ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1)?;
        } else {
            break;
        }
    }
    if seen {
        Some(col_idx - 1)
    } else {
        None
    }
}
