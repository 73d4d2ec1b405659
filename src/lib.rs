//! # excelmap
//!
//! Streaming mapping between spreadsheet rows and Rust types.
//!
//! ## Features
//!
//! - **Streaming Read**: rows are pulled from the worksheet XML one at a time and
//!   handed to an iterator or a listener, never the whole sheet
//! - **Streaming Write**: rows are converted and flushed in bounded batches
//! - **Converters**: per-session registry keyed by application type and cell kind,
//!   with built-ins for text, numbers, booleans and dates
//! - **Layered overrides**: converters and formats can be set per session, per
//!   sheet and per field; the nearest level wins
//! - **Session isolation**: every reader and writer owns its registry and
//!   configuration, nothing is shared between sessions
//!
//! ## Quick Start
//!
//! ### Reading
//!
//! ```rust,no_run
//! use excelmap::{Flow, ReadSheet, Record};
//!
//! # fn main() -> excelmap::Result<()> {
//! let mut reader = excelmap::read::<Record>("data.xlsx").build()?;
//!
//! for row in reader.rows("Sheet1")? {
//!     let row = row?;
//!     println!("Row: {:?}", row.to_strings());
//! }
//!
//! reader.read_sheet(ReadSheet::index(0), &mut |row: Record| {
//!     println!("{} fields", row.len());
//!     Ok(Flow::Continue)
//! })?;
//! reader.finish()?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Writing
//!
//! ```rust,no_run
//! use excelmap::{CellValue, Record, Value};
//!
//! # fn main() -> excelmap::Result<()> {
//! let mut writer = excelmap::write::<Record>("output.xlsx").build()?;
//!
//! writer.write_row(&Record::new().with("Name", "Alice").with("Age", 30i64))?;
//! writer.write_row(
//!     &Record::new()
//!         .with("Name", "Total")
//!         .with("Age", Value::Cell(CellValue::formula("COUNT(B2:B2)", None))),
//! )?;
//!
//! writer.finish()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod converter;
pub mod error;
pub mod holder;
pub mod reader;
pub mod schema;
pub mod types;
pub mod value;
pub mod writer;
pub mod xlsx;

pub use config::{
    ErrorPolicy, MemoryProfile, ReadOptions, ReadSheet, SheetSelector, WriteOptions, WriteSheet,
};
pub use context::{
    Context, HolderRef, ReadContext, ReadState, SessionState, SheetScope, WriteContext, WriteState,
};
pub use converter::{
    BuiltinConverter, Converter, ConverterRegistry, FieldConfig, GlobalConfig, Resolved,
};
pub use error::{ExcelError, Result};
pub use holder::{Holder, HolderConfig, HolderScope};
pub use reader::{ExcelReader, Flow, ReadListener, ReadSummary, ReaderBuilder, RowIter};
pub use schema::{ExcelRow, FieldDescriptor, Schema};
pub use types::{column_letter, CellKind, CellStyle, CellValue, MergeRange};
pub use value::{AppKind, FromValue, IntoValue, Record, Value};
pub use writer::{ExcelWriter, WriterBuilder};
pub use xlsx::{SheetCell, SheetInfo, SheetRow, SheetSink, SheetSource, XlsxSink, XlsxSource};

use std::path::Path;

/// Start building a reader session for `path`
pub fn read<T: ExcelRow>(path: impl AsRef<Path>) -> ReaderBuilder<T> {
    ReaderBuilder::new(path)
}

/// Start building a writer session for `path`
pub fn write<T: ExcelRow>(path: impl AsRef<Path>) -> WriterBuilder<T> {
    WriterBuilder::new(path)
}
