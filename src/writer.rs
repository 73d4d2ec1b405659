//! Streaming write engine and writer session
//!
//! Rows are converted field by field through the holder chain and collected
//! into a batch of at most `batch_size` rows. Full batches are handed to the
//! [`SheetSink`] and never revisited, so memory stays bounded by one batch no
//! matter how many rows are written.
//!
//! ```no_run
//! use excelmap::{Record, Value};
//!
//! # fn main() -> excelmap::Result<()> {
//! let mut writer = excelmap::write::<Record>("people.xlsx")
//!     .with_batch_size(500)
//!     .build()?;
//!
//! writer.write_row(&Record::new().with("Name", "Alice").with("Age", 30i64))?;
//! writer.write_row(&Record::new().with("Name", "Bob").with("Age", Value::Null))?;
//! writer.finish()?;
//! # Ok(())
//! # }
//! ```

use crate::config::{MemoryProfile, WriteOptions, WriteSheet};
use crate::context::{SessionState, SheetScope, WriteContext, WriteState};
use crate::converter::{Converter, ConverterRegistry, FieldConfig, GlobalConfig};
use crate::error::{ExcelError, Result};
use crate::holder::{FieldBinding, Holder, HolderConfig};
use crate::schema::{ExcelRow, FieldDescriptor, Schema};
use crate::types::{column_letter, CellStyle, CellValue, MergeRange};
use crate::value::{AppKind, Record, Value};
use crate::xlsx::{SheetCell, SheetRow, SheetSink, XlsxSink};
use log::{debug, trace, warn};
use std::borrow::Borrow;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

enum SinkSpec {
    Path(PathBuf),
    Custom(Box<dyn SheetSink>),
}

/// Builder for [`ExcelWriter`]
pub struct WriterBuilder<T> {
    sink: SinkSpec,
    options: WriteOptions,
    config: HolderConfig,
    converters: Vec<Arc<dyn Converter>>,
    schema: Option<Schema>,
    _marker: PhantomData<fn(&T)>,
}

impl<T: ExcelRow> WriterBuilder<T> {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_spec(SinkSpec::Path(path.as_ref().to_path_buf()))
    }

    /// Write into any row sink instead of a file
    pub fn to_sink(sink: impl SheetSink + 'static) -> Self {
        Self::with_spec(SinkSpec::Custom(Box::new(sink)))
    }

    fn with_spec(sink: SinkSpec) -> Self {
        WriterBuilder {
            sink,
            options: WriteOptions::default(),
            config: HolderConfig::default(),
            converters: Vec::new(),
            schema: None,
            _marker: PhantomData,
        }
    }

    pub fn with_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    /// Rows held before a flush to the sink
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.options.batch_size = size.max(1);
        self
    }

    pub fn with_memory_profile(mut self, profile: MemoryProfile) -> Self {
        self.options.batch_size = profile.batch_size();
        self
    }

    pub fn with_write_header(mut self, enabled: bool) -> Self {
        self.options.write_header = enabled;
        self
    }

    /// Deflate level 0-9
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.options.compression_level = level.min(9);
        self
    }

    pub fn with_auto_trim(mut self, trim: bool) -> Self {
        self.options.auto_trim = trim;
        self
    }

    /// Name of the sheet opened when rows arrive before any `sheet()` call
    pub fn with_sheet_name(mut self, name: impl Into<String>) -> Self {
        self.options.default_sheet_name = name.into();
        self
    }

    /// Session-level converter override (holder chain root)
    pub fn with_converter(mut self, converter: impl Converter + 'static) -> Self {
        self.config = self.config.converter(converter);
        self
    }

    /// Session-level date/number pattern
    pub fn with_format(mut self, pattern: impl Into<String>) -> Self {
        self.config = self.config.format(pattern);
        self
    }

    pub fn with_default_converters(mut self, enabled: bool) -> Self {
        self.config = self.config.use_default_converter(enabled);
        self
    }

    /// Replace `T::schema()` for this session
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Register a converter in this session's registry only
    pub fn register_converter(mut self, converter: impl Converter + 'static) -> Self {
        self.converters.push(Arc::new(converter));
        self
    }

    /// Create the output and the session
    pub fn build(self) -> Result<ExcelWriter<T>> {
        let sink: Box<dyn SheetSink> = match self.sink {
            SinkSpec::Path(path) => Box::new(XlsxSink::create(&path, self.options.compression_level)?),
            SinkSpec::Custom(sink) => sink,
        };

        let mut registry = ConverterRegistry::with_builtins();
        for converter in self.converters {
            registry.register(converter)?;
        }
        let global = GlobalConfig {
            auto_trim: self.options.auto_trim,
            date1904: false,
        };
        let context = WriteContext::new(
            registry,
            Holder::session(self.config),
            global,
            WriteState::Idle,
        );
        debug!(
            "Write session opened: batch size {}, {} registered converters",
            self.options.batch_size,
            context.converter_registry().registered().count()
        );

        Ok(ExcelWriter {
            sink,
            context,
            options: self.options,
            schema: self.schema.unwrap_or_else(T::schema),
            sheet: None,
            sheets_written: 0,
            _marker: PhantomData,
        })
    }

    /// Build, write every row into the default sheet and finish
    pub fn do_write<I>(self, rows: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        let mut writer = self.build()?;
        writer.write_rows(rows)?;
        writer.finish()
    }
}

/// Sheet being written
struct ActiveSheet {
    /// Empty until the first record arrives for dynamic schemas
    bindings: Vec<FieldBinding>,
    holder: Arc<Holder>,
    batch: Vec<SheetRow>,
    merges: Vec<MergeRange>,
    next_row: u32,
    /// Rows below this index have left the batch
    flushed_rows: u32,
}

/// Writer session: owns its registry, holder chain and sink
pub struct ExcelWriter<T> {
    sink: Box<dyn SheetSink>,
    context: WriteContext,
    options: WriteOptions,
    schema: Schema,
    sheet: Option<ActiveSheet>,
    sheets_written: usize,
    _marker: PhantomData<fn(&T)>,
}

impl<T: ExcelRow> ExcelWriter<T> {
    /// Register a converter; only allowed before writing starts
    pub fn register_converter(&mut self, converter: impl Converter + 'static) -> Result<()> {
        match self.context.session_state() {
            SessionState::Finished => Err(ExcelError::SessionClosed("register a converter")),
            SessionState::Active => Err(ExcelError::Configuration(format!(
                "converter {} registered after writing started",
                converter.name()
            ))),
            SessionState::Building => self.context.registry_mut().register(Arc::new(converter)),
        }
    }

    pub fn context(&self) -> &WriteContext {
        &self.context
    }

    fn ensure_open(&self, action: &'static str) -> Result<()> {
        if self.context.session_state() == SessionState::Finished {
            return Err(ExcelError::SessionClosed(action));
        }
        Ok(())
    }

    /// Start a new sheet, finishing the current one
    pub fn sheet(&mut self, sheet: impl Into<WriteSheet>) -> Result<()> {
        self.ensure_open("start a sheet")?;
        self.close_sheet()?;
        self.context.activate();

        let sheet = sheet.into();
        let holder = Holder::sheet(self.context.root_holder(), sheet.name.clone(), sheet.config);
        let bindings = bind_fields(self.schema.fields(), &holder)?;

        self.sink.start_sheet(&sheet.name)?;
        self.context.enter_sheet(SheetScope {
            index: self.sheets_written,
            name: sheet.name.clone(),
            holder: Arc::clone(&holder),
        });
        self.context.set_state(WriteState::Idle);
        debug!("Writing sheet '{}'", sheet.name);

        self.sheet = Some(ActiveSheet {
            bindings,
            holder,
            batch: Vec::with_capacity(self.options.batch_size.min(4096)),
            merges: sheet.merges,
            next_row: 0,
            flushed_rows: 0,
        });
        if !self.schema.is_dynamic() {
            self.write_header()?;
        }
        Ok(())
    }

    fn active(&mut self) -> Result<&mut ActiveSheet> {
        if self.sheet.is_none() {
            let name = self.options.default_sheet_name.clone();
            self.sheet(name)?;
        }
        self.sheet
            .as_mut()
            .ok_or(ExcelError::SessionClosed("write without a sheet"))
    }

    fn write_header(&mut self) -> Result<()> {
        if !self.options.write_header {
            return Ok(());
        }
        let sheet = self.active()?;
        let cells = sheet
            .bindings
            .iter()
            .map(|b| SheetCell::new(b.column, CellValue::String(b.field.header_text().to_string())))
            .collect::<Vec<_>>();
        let mut row = SheetRow::new(sheet.next_row);
        row.cells = sorted(cells);
        sheet.next_row += 1;
        sheet.batch.push(row);
        self.context.set_state(WriteState::HeaderWritten);
        Ok(())
    }

    /// Append one row
    pub fn write_row(&mut self, row: &T) -> Result<()> {
        self.ensure_open("write a row")?;
        let record = row.to_record();
        let unbound = self.active()?.bindings.is_empty();

        if self.schema.is_dynamic() && unbound && !record.is_empty() {
            let fields = infer_fields(&record);
            if let Some(sheet) = self.sheet.as_mut() {
                sheet.bindings = bind_fields(&fields, &sheet.holder)?;
            }
            self.write_header()?;
        }

        let Some(sheet) = self.sheet.as_mut() else {
            return Err(ExcelError::SessionClosed("write without a sheet"));
        };
        let index = sheet.next_row;
        self.context.set_row(index);
        if self.schema.is_dynamic() {
            for name in record.names() {
                if !sheet.bindings.iter().any(|b| b.field.name == name) {
                    warn!(
                        "Field '{}' of row {} has no column on sheet '{}'; it is not written",
                        name,
                        index + 1,
                        self.context.sheet_name()
                    );
                }
            }
        }
        let cells = convert_record(&record, &sheet.bindings, &self.context, index)?;

        let mut row = SheetRow::new(index);
        row.cells = sorted(cells);
        sheet.next_row += 1;
        sheet.batch.push(row);
        let full = sheet.batch.len() >= self.options.batch_size;
        trace!("Buffered row {}", index + 1);
        self.context.set_state(WriteState::RowStreaming);

        if full {
            self.flush()?;
        }
        Ok(())
    }

    /// Append every row of a row source
    pub fn write_rows<I>(&mut self, rows: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        for row in rows {
            self.write_row(row.borrow())?;
        }
        Ok(())
    }

    /// Declare a merged area on the current sheet
    ///
    /// The area must start at a row that has not been flushed yet.
    pub fn merge(&mut self, range: MergeRange) -> Result<()> {
        self.ensure_open("merge cells")?;
        let sheet = self.active()?;
        if range.first_row < sheet.flushed_rows {
            return Err(ExcelError::Configuration(format!(
                "merge {} starts at row {} which is already flushed (flushed up to row {})",
                range.reference(),
                range.first_row + 1,
                sheet.flushed_rows
            )));
        }
        sheet.merges.push(range);
        Ok(())
    }

    /// Hand the buffered batch to the sink
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open("flush")?;
        let Some(sheet) = self.sheet.as_mut() else {
            return Ok(());
        };
        if sheet.batch.is_empty() {
            return Ok(());
        }
        let previous = self.context.state();
        self.context.set_state(WriteState::Flushing);
        self.sink.write_rows(&sheet.batch)?;
        debug!(
            "Flushed {} rows of '{}'",
            sheet.batch.len(),
            self.context.sheet_name()
        );
        sheet.batch.clear();
        sheet.flushed_rows = sheet.next_row;
        self.context.set_state(previous);
        Ok(())
    }

    fn close_sheet(&mut self) -> Result<()> {
        if self.sheet.is_none() {
            return Ok(());
        }
        self.flush()?;
        if let Some(sheet) = self.sheet.take() {
            self.sink.finish_sheet(&sheet.merges)?;
            debug!(
                "Finished sheet '{}': {} rows",
                self.context.sheet_name(),
                sheet.next_row
            );
        }
        self.sheets_written += 1;
        self.context.leave_sheet();
        Ok(())
    }

    /// Flush the partial batch and close the output
    pub fn finish(&mut self) -> Result<()> {
        self.ensure_open("finish twice")?;
        if self.sheet.is_none() && self.sheets_written == 0 {
            let name = self.options.default_sheet_name.clone();
            self.sheet(name)?;
        }
        self.close_sheet()?;
        self.sink.close()?;
        self.context.set_state(WriteState::Finished);
        self.context.close();
        debug!("Write session finished: {} sheets", self.sheets_written);
        Ok(())
    }
}

/// Bind fields to columns: explicit column, otherwise declaration order
fn bind_fields(fields: &[FieldDescriptor], sheet: &Arc<Holder>) -> Result<Vec<FieldBinding>> {
    let mut seen = HashSet::with_capacity(fields.len());
    fields
        .iter()
        .enumerate()
        .map(|(position, field)| {
            let column = field.column.unwrap_or(position as u32);
            if !seen.insert(column) {
                return Err(ExcelError::Configuration(format!(
                    "field '{}' maps to column {} which is already taken",
                    field.name,
                    column_letter(column)
                )));
            }
            Ok(FieldBinding::new(field.clone(), column, sheet))
        })
        .collect()
}

/// Text fields for nulls, the value's own kind otherwise
fn infer_fields(record: &Record) -> Vec<FieldDescriptor> {
    record
        .iter()
        .map(|(name, value)| FieldDescriptor::new(name, value.kind().unwrap_or(AppKind::Text)))
        .collect()
}

fn convert_record(
    record: &Record,
    bindings: &[FieldBinding],
    context: &WriteContext,
    row: u32,
) -> Result<Vec<SheetCell>> {
    let mut cells = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let value = match record.get(&binding.field.name) {
            Some(value) if !value.is_null() => value,
            _ => continue,
        };
        let kind = binding.field.kind;
        let wrap = |source: ExcelError| ExcelError::Conversion {
            sheet: context.sheet_name().to_string(),
            row: row + 1,
            column: column_letter(binding.column),
            field: binding.field.name.clone(),
            expected: kind.to_string(),
            source: Box::new(source),
        };
        let resolved = binding
            .holder
            .resolve_write(context.converter_registry(), kind)
            .map_err(wrap)?;
        let field = FieldConfig::new(&binding.field.name, kind).with_format(binding.format());
        let cell = resolved.write(value, &field, context.global()).map_err(wrap)?;
        if cell == CellValue::Empty {
            continue;
        }
        if let CellValue::Number(n) = cell.effective() {
            if !n.is_finite() {
                return Err(wrap(ExcelError::InvalidValue(format!(
                    "{} cannot be stored in a cell",
                    n
                ))));
            }
        }
        let style = match (&cell, value) {
            (CellValue::Number(_), Value::Date(_)) => CellStyle::Date,
            (CellValue::Number(_), Value::DateTime(_)) => CellStyle::DateTime,
            _ => CellStyle::Default,
        };
        cells.push(SheetCell::styled(binding.column, cell, style));
    }
    Ok(cells)
}

fn sorted(mut cells: Vec<SheetCell>) -> Vec<SheetCell> {
    cells.sort_by_key(|c| c.col);
    cells
}
