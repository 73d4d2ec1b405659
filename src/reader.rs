//! Streaming read engine and reader session
//!
//! Rows are pulled from a [`SheetSource`] one at a time, bound to the fields of
//! the mapped type, converted cell by cell through the holder chain and handed
//! to the caller, either as an iterator ([`ExcelReader::rows`]) or through a
//! [`ReadListener`]. Only one raw row is held at a time.

use crate::config::{ErrorPolicy, ReadOptions, ReadSheet, SheetSelector};
use crate::context::{ReadContext, ReadState, SessionState, SheetScope};
use crate::converter::{Converter, ConverterRegistry, FieldConfig, GlobalConfig};
use crate::error::{ExcelError, Result};
use crate::holder::{FieldBinding, Holder, HolderConfig};
use crate::schema::{ExcelRow, FieldDescriptor, Schema};
use crate::types::{column_letter, CellKind, CellValue, MAX_COLUMN};
use crate::value::{AppKind, Record, Value};
use crate::xlsx::{SheetRow, SheetRows, SheetSource, XlsxSource};
use log::{debug, trace, warn};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Whether the listener wants more rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Receives the rows of a sheet as they are read
///
/// Closures `FnMut(T) -> Result<Flow>` are listeners too.
pub trait ReadListener<T> {
    /// Header texts, once per sheet, before the first row
    fn on_header(&mut self, header: &[String], context: &ReadContext) -> Result<()> {
        let _ = (header, context);
        Ok(())
    }

    fn on_row(&mut self, row: T, context: &ReadContext) -> Result<Flow>;

    /// Called for every error the engine does not recover from itself.
    /// Returning `Ok` continues with the next row; the default re-raises.
    fn on_error(&mut self, error: ExcelError, context: &ReadContext) -> Result<()> {
        let _ = context;
        Err(error)
    }

    /// After the last row of a sheet
    fn on_finish(&mut self, context: &ReadContext) {
        let _ = context;
    }
}

impl<T, F> ReadListener<T> for F
where
    F: FnMut(T) -> Result<Flow>,
{
    fn on_row(&mut self, row: T, _context: &ReadContext) -> Result<Flow> {
        self(row)
    }
}

/// Outcome of reading one sheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadSummary {
    pub sheet: String,
    /// Rows delivered to the listener
    pub rows: u64,
    /// The listener asked to stop
    pub stopped: bool,
}

enum SourceSpec {
    Path(PathBuf),
    Custom(Box<dyn SheetSource>),
}

/// Builder for [`ExcelReader`]
pub struct ReaderBuilder<T> {
    source: SourceSpec,
    options: ReadOptions,
    config: HolderConfig,
    converters: Vec<Arc<dyn Converter>>,
    schema: Option<Schema>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ExcelRow> ReaderBuilder<T> {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_spec(SourceSpec::Path(path.as_ref().to_path_buf()))
    }

    /// Read from any row source instead of a file
    pub fn from_source(source: impl SheetSource + 'static) -> Self {
        Self::with_spec(SourceSpec::Custom(Box::new(source)))
    }

    fn with_spec(source: SourceSpec) -> Self {
        ReaderBuilder {
            source,
            options: ReadOptions::default(),
            config: HolderConfig::default(),
            converters: Vec::new(),
            schema: None,
            _marker: PhantomData,
        }
    }

    pub fn with_options(mut self, options: ReadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_header_rows(mut self, rows: usize) -> Self {
        self.options.header_rows = rows;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.options.error_policy = policy;
        self
    }

    pub fn with_ignore_empty_rows(mut self, ignore: bool) -> Self {
        self.options.ignore_empty_rows = ignore;
        self
    }

    pub fn with_auto_trim(mut self, trim: bool) -> Self {
        self.options.auto_trim = trim;
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

    /// Open the source and create the session
    pub fn build(self) -> Result<ExcelReader<T>> {
        let source: Box<dyn SheetSource> = match self.source {
            SourceSpec::Path(path) => Box::new(XlsxSource::open(&path)?),
            SourceSpec::Custom(source) => source,
        };

        let mut registry = ConverterRegistry::with_builtins();
        for converter in self.converters {
            registry.register(converter)?;
        }
        let global = GlobalConfig {
            auto_trim: self.options.auto_trim,
            date1904: false,
        };
        let mut context = ReadContext::new(
            registry,
            Holder::session(self.config),
            global,
            ReadState::OpeningArchive,
        );
        // Workbook-level flags are known once the archive is open
        context.set_date1904(source.date1904());
        context.set_state(ReadState::Idle);

        debug!(
            "Read session opened: {} sheets, {} registered converters",
            source.sheets().len(),
            context.converter_registry().registered().count()
        );

        Ok(ExcelReader {
            source,
            context,
            options: self.options,
            schema: self.schema.unwrap_or_else(T::schema),
            consumed: HashSet::new(),
            _marker: PhantomData,
        })
    }

    /// Build, read every sheet into `listener` and finish
    pub fn do_read<L: ReadListener<T>>(self, listener: &mut L) -> Result<()> {
        self.build()?.read_all(listener)
    }
}

/// Reader session: owns its registry, holder chain and source
pub struct ExcelReader<T> {
    source: Box<dyn SheetSource>,
    context: ReadContext,
    options: ReadOptions,
    schema: Schema,
    /// Sheets whose rows have been handed out; each sheet is read once
    consumed: HashSet<usize>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ExcelRow> ExcelReader<T> {
    /// Register a converter; only allowed before reading starts
    pub fn register_converter(&mut self, converter: impl Converter + 'static) -> Result<()> {
        match self.context.session_state() {
            SessionState::Finished => Err(ExcelError::SessionClosed("register a converter")),
            SessionState::Active => Err(ExcelError::Configuration(format!(
                "converter {} registered after reading started",
                converter.name()
            ))),
            SessionState::Building => self.context.registry_mut().register(Arc::new(converter)),
        }
    }

    pub fn context(&self) -> &ReadContext {
        &self.context
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.source.sheets().iter().map(|s| s.name.clone()).collect()
    }

    fn ensure_open(&self, action: &'static str) -> Result<()> {
        if self.context.session_state() == SessionState::Finished {
            return Err(ExcelError::SessionClosed(action));
        }
        Ok(())
    }

    /// A fatal error leaves the session unable to read further
    fn ensure_readable(&self, action: &'static str) -> Result<()> {
        self.ensure_open(action)?;
        if self.context.state() == ReadState::Error {
            return Err(ExcelError::SessionClosed("read after a fatal error"));
        }
        Ok(())
    }

    /// Whether the rows of sheet `index` have already been handed out
    pub fn is_consumed(&self, index: usize) -> bool {
        self.consumed.contains(&index)
    }

    fn sheet_index(&self, selector: &SheetSelector) -> Result<usize> {
        let sheets = self.source.sheets();
        let found = match selector {
            SheetSelector::Index(index) => Some(*index).filter(|i| *i < sheets.len()),
            SheetSelector::Name(name) => sheets.iter().position(|s| &s.name == name),
        };
        found.ok_or_else(|| ExcelError::SheetNotFound {
            sheet: match selector {
                SheetSelector::Index(index) => format!("#{}", index),
                SheetSelector::Name(name) => name.clone(),
            },
            available: sheets
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// Pull rows of one sheet
    pub fn rows(&mut self, sheet: impl Into<ReadSheet>) -> Result<RowIter<'_, T>> {
        self.ensure_readable("read rows")?;
        let sheet = sheet.into();
        let index = self.sheet_index(&sheet.selector)?;
        let name = self.source.sheets()[index].name.clone();
        if !self.consumed.insert(index) {
            return Err(ExcelError::Configuration(format!(
                "sheet '{}' has already been read in this session",
                name
            )));
        }

        self.context.activate();
        self.context.set_state(ReadState::SheetScan);
        let holder = Holder::sheet(self.context.root_holder(), name.clone(), sheet.config);
        self.context.enter_sheet(SheetScope {
            index,
            name: name.clone(),
            holder: Arc::clone(&holder),
        });
        let header_rows = sheet.header_rows.unwrap_or(self.options.header_rows);
        debug!("Reading sheet '{}' ({} header rows)", name, header_rows);

        let rows = match self.source.rows(index) {
            Ok(rows) => rows,
            Err(e) => {
                self.context.set_state(if e.is_fatal() {
                    ReadState::Error
                } else {
                    ReadState::Idle
                });
                return Err(e);
            }
        };
        Ok(RowIter {
            rows,
            context: &mut self.context,
            schema: &self.schema,
            options: &self.options,
            header_rows: u32::try_from(header_rows).unwrap_or(u32::MAX),
            header: Vec::new(),
            bindings: None,
            sheet_holder: holder,
            lookahead: None,
            next_index: u32::try_from(header_rows).unwrap_or(u32::MAX),
            done: false,
            _marker: PhantomData,
        })
    }

    /// Read one sheet into `listener`
    pub fn read_sheet<L: ReadListener<T>>(
        &mut self,
        sheet: impl Into<ReadSheet>,
        listener: &mut L,
    ) -> Result<ReadSummary> {
        let mut iter = self.rows(sheet)?;
        let mut summary = ReadSummary {
            sheet: iter.context().sheet_name().to_string(),
            rows: 0,
            stopped: false,
        };
        let mut header_sent = iter.header_rows == 0;

        loop {
            let item = iter.next();
            if !header_sent && iter.is_bound() {
                header_sent = true;
                listener.on_header(&iter.header, iter.context())?;
            }
            match item {
                None => break,
                Some(Ok(row)) => {
                    summary.rows += 1;
                    trace!(
                        "Delivering row {} of '{}'",
                        iter.context().row_index().map(|r| r + 1).unwrap_or(0),
                        summary.sheet
                    );
                    if listener.on_row(row, iter.context())? == Flow::Stop {
                        summary.stopped = true;
                        break;
                    }
                }
                Some(Err(e)) => {
                    let fatal = e.is_fatal();
                    listener.on_error(e, iter.context())?;
                    if fatal {
                        break;
                    }
                }
            }
        }

        listener.on_finish(iter.context());
        debug!(
            "Finished sheet '{}': {} rows delivered{}",
            summary.sheet,
            summary.rows,
            if summary.stopped { " (stopped)" } else { "" }
        );
        Ok(summary)
    }

    /// Read every sheet not read yet, in order, then finish the session
    pub fn read_all<L: ReadListener<T>>(&mut self, listener: &mut L) -> Result<()> {
        for index in 0..self.source.sheets().len() {
            if self.is_consumed(index) {
                continue;
            }
            if self.read_sheet(ReadSheet::index(index), listener)?.stopped {
                break;
            }
        }
        self.finish()
    }

    /// Release the source; every later operation fails with `SessionClosed`
    pub fn finish(&mut self) -> Result<()> {
        self.ensure_open("finish twice")?;
        self.context.leave_sheet();
        self.context.set_state(ReadState::Finished);
        self.context.close();
        debug!("Read session finished");
        Ok(())
    }
}

/// Pull iterator over the mapped rows of one sheet
pub struct RowIter<'a, T> {
    rows: SheetRows<'a>,
    context: &'a mut ReadContext,
    schema: &'a Schema,
    options: &'a ReadOptions,
    header_rows: u32,
    header: Vec<String>,
    bindings: Option<Vec<FieldBinding>>,
    sheet_holder: Arc<Holder>,
    /// Real row held back while empty rows are synthesized in front of it
    lookahead: Option<SheetRow>,
    next_index: u32,
    done: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: ExcelRow> RowIter<'a, T> {
    pub fn context(&self) -> &ReadContext {
        self.context
    }

    /// Header texts collected so far, by column
    pub fn header(&self) -> &[String] {
        &self.header
    }

    fn is_bound(&self) -> bool {
        self.bindings.is_some()
    }

    fn absorb_header(&mut self, row: &SheetRow) {
        for cell in &row.cells {
            let text = cell.value.effective().to_string();
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            let col = cell.col as usize;
            if self.header.len() <= col {
                self.header.resize(col + 1, String::new());
            }
            self.header[col] = text.to_string();
        }
    }

    fn bind(&mut self) -> Result<()> {
        if self.bindings.is_some() {
            return Ok(());
        }
        let bindings: Vec<FieldBinding> = if self.schema.is_dynamic() {
            (0..self.header.len() as u32)
                .map(|col| self.dynamic_binding(col))
                .collect()
        } else {
            self.schema
                .fields()
                .iter()
                .enumerate()
                .map(|(position, field)| {
                    let column = field
                        .column
                        .or_else(|| {
                            self.header
                                .iter()
                                .position(|h| h == field.header_text().trim())
                                .map(|c| c as u32)
                        })
                        .unwrap_or(position as u32);
                    FieldBinding::new(field.clone(), column, &self.sheet_holder)
                })
                .collect()
        };
        for (i, binding) in bindings.iter().enumerate() {
            if let Some(other) = bindings[..i].iter().find(|b| b.column == binding.column) {
                return Err(ExcelError::Configuration(format!(
                    "fields '{}' and '{}' both read column {} of sheet '{}'",
                    other.field.name,
                    binding.field.name,
                    column_letter(binding.column),
                    self.context.sheet_name()
                )));
            }
        }
        self.bindings = Some(bindings);
        self.context.set_state(ReadState::RowStreaming);
        Ok(())
    }

    /// Text field named after the header cell, or the column letter
    fn dynamic_binding(&self, col: u32) -> FieldBinding {
        let header = self
            .header
            .get(col as usize)
            .filter(|h| !h.is_empty())
            .filter(|h| {
                // Duplicate header texts would collide in the record
                self.header[..col as usize].iter().all(|other| other != *h)
            })
            .cloned()
            .unwrap_or_else(|| column_letter(col));
        FieldBinding::new(
            FieldDescriptor::new(header, AppKind::Text).column(col),
            col,
            &self.sheet_holder,
        )
    }

    fn finish_sheet(&mut self) {
        self.done = true;
        if self.context.state() != ReadState::Error {
            self.context.set_state(ReadState::Finished);
        }
    }

    /// Stop the sheet; a fatal error also ends the session's reading
    fn fail(&mut self, error: ExcelError) -> Option<Result<T>> {
        self.done = true;
        if error.is_fatal() {
            self.context.set_state(ReadState::Error);
        } else if self.context.state() != ReadState::Error {
            self.context.set_state(ReadState::Finished);
        }
        Some(Err(error))
    }

    fn convert(&mut self, row: SheetRow) -> Result<Option<T>> {
        self.context.set_row(row.index);

        let width = row.width();
        if width > MAX_COLUMN + 1 {
            return Err(ExcelError::MalformedDocument(format!(
                "row {} addresses column {} beyond the last worksheet column",
                row.index + 1,
                width
            )));
        }

        if self.schema.is_dynamic() {
            let bound = self.bindings.as_ref().map(|b| b.len() as u32).unwrap_or(0);
            for col in bound..width {
                let binding = self.dynamic_binding(col);
                if let Some(bindings) = self.bindings.as_mut() {
                    bindings.push(binding);
                }
            }
        }

        let mut cells: Vec<CellValue> = vec![CellValue::Empty; width as usize];
        for cell in row.cells {
            cells[cell.col as usize] = cell.value;
        }

        let context: &ReadContext = &*self.context;
        let bindings = self.bindings.as_deref().unwrap_or_default();
        let mut record = Record::with_capacity(bindings.len());
        for binding in bindings {
            let cell = cells
                .get_mut(binding.column as usize)
                .map(std::mem::take)
                .unwrap_or_default();
            match read_cell(binding, &cell, context, row.index) {
                Ok(value) => record.insert(binding.field.name.as_str(), value),
                Err(e) => match self.options.error_policy {
                    ErrorPolicy::Abort => return Err(e),
                    ErrorPolicy::UseDefault => {
                        warn!("{}; using default value", e);
                        record.insert(binding.field.name.as_str(), binding.field.fallback_value());
                    }
                    ErrorPolicy::SkipRow => {
                        warn!("{}; skipping row", e);
                        return Ok(None);
                    }
                },
            }
        }

        match T::from_record(record) {
            Ok(mapped) => Ok(Some(mapped)),
            Err(e) => {
                let e = ExcelError::Conversion {
                    sheet: context.sheet_name().to_string(),
                    row: row.index + 1,
                    column: String::from("*"),
                    field: String::from("*"),
                    expected: std::any::type_name::<T>().to_string(),
                    source: Box::new(e),
                };
                if self.options.error_policy == ErrorPolicy::SkipRow {
                    warn!("{}; skipping row", e);
                    return Ok(None);
                }
                Err(e)
            }
        }
    }
}

/// Convert one cell through the field's holder chain
fn read_cell(
    binding: &FieldBinding,
    cell: &CellValue,
    context: &ReadContext,
    row: u32,
) -> Result<Value> {
    let kind = binding.field.kind;
    if binding.holder.is_identity(kind) {
        return Ok(Value::Cell(cell.clone()));
    }

    let effective = cell.effective();
    let blank = effective.kind() == CellKind::Empty || (kind != AppKind::Text && effective.is_empty());
    if blank {
        return Ok(Value::Null);
    }

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
        .resolve_read(context.converter_registry(), kind, effective.kind())
        .map_err(wrap)?;
    let field = FieldConfig::new(&binding.field.name, kind).with_format(binding.format());
    resolved
        .read(effective, &field, context.global())
        .map_err(wrap)
}

impl<T: ExcelRow> Iterator for RowIter<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            let row = match self.lookahead.take() {
                Some(row) => row,
                None => match self.rows.next() {
                    None => {
                        if let Err(e) = self.bind() {
                            return self.fail(e);
                        }
                        self.finish_sheet();
                        return None;
                    }
                    Some(Err(e)) => return self.fail(e),
                    Some(Ok(row)) => row,
                },
            };

            if row.index < self.header_rows {
                self.absorb_header(&row);
                continue;
            }
            if let Err(e) = self.bind() {
                return self.fail(e);
            }

            let row = if !self.options.ignore_empty_rows && row.index > self.next_index {
                let gap = SheetRow::new(self.next_index);
                self.lookahead = Some(row);
                gap
            } else {
                row
            };
            self.next_index = row.index + 1;

            if self.options.ignore_empty_rows && row.is_blank() {
                continue;
            }
            match self.convert(row) {
                Ok(Some(mapped)) => return Some(Ok(mapped)),
                Ok(None) => continue,
                Err(e) if e.is_fatal() => return self.fail(e),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::GlobalConfig;
    use crate::types::CellKind;
    use crate::xlsx::{SheetCell, SheetInfo};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// In-memory source: one sheet of rows
    struct MemorySource {
        sheets: Vec<SheetInfo>,
        rows: Vec<Vec<SheetRow>>,
    }

    impl MemorySource {
        fn single(rows: Vec<SheetRow>) -> Self {
            MemorySource {
                sheets: vec![SheetInfo {
                    name: "Sheet1".into(),
                    path: "xl/worksheets/sheet1.xml".into(),
                }],
                rows: vec![rows],
            }
        }
    }

    impl SheetSource for MemorySource {
        fn sheets(&self) -> &[SheetInfo] {
            &self.sheets
        }

        fn rows(&mut self, index: usize) -> Result<SheetRows<'_>> {
            Ok(Box::new(self.rows[index].clone().into_iter().map(Ok)))
        }
    }

    fn row(index: u32, values: Vec<CellValue>) -> SheetRow {
        SheetRow {
            index,
            cells: values
                .into_iter()
                .enumerate()
                .filter(|(_, v)| *v != CellValue::Empty)
                .map(|(col, v)| SheetCell::new(col as u32, v))
                .collect(),
        }
    }

    #[derive(Debug, PartialEq)]
    struct Person {
        name: String,
        age: Option<i64>,
    }

    impl ExcelRow for Person {
        fn schema() -> Schema {
            Schema::new(vec![
                FieldDescriptor::new("name", AppKind::Text).header("Name"),
                FieldDescriptor::new("age", AppKind::Integer).header("Age"),
            ])
        }

        fn from_record(mut record: Record) -> Result<Self> {
            Ok(Person {
                name: record.take("name")?,
                age: record.take("age")?,
            })
        }

        fn to_record(&self) -> Record {
            Record::new().with("name", self.name.as_str()).with("age", self.age)
        }
    }

    fn people_source() -> MemorySource {
        MemorySource::single(vec![
            row(0, vec!["Age".into(), "Name".into()]),
            row(1, vec![CellValue::Number(30.0), "Alice".into()]),
            row(3, vec![CellValue::Error("#N/A".into()), "Bob".into()]),
        ])
    }

    struct Shout;

    impl Converter for Shout {
        fn app_kind(&self) -> AppKind {
            AppKind::Text
        }

        fn cell_kind(&self) -> CellKind {
            CellKind::String
        }

        fn to_value(&self, cell: &CellValue, _: &FieldConfig<'_>, _: &GlobalConfig) -> Result<Value> {
            Ok(Value::Text(cell.to_string().to_uppercase()))
        }
    }

    #[test]
    fn test_header_matching_binds_by_text() {
        let mut reader = ReaderBuilder::<Person>::from_source(people_source())
            .with_error_policy(ErrorPolicy::UseDefault)
            .build()
            .unwrap();
        let people: Vec<Person> = reader
            .rows(ReadSheet::index(0))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            people,
            vec![
                Person {
                    name: "Alice".into(),
                    age: Some(30)
                },
                Person {
                    name: "Bob".into(),
                    age: Some(0)
                },
            ]
        );
    }

    #[test]
    fn test_abort_reports_coordinates() {
        let mut reader = ReaderBuilder::<Person>::from_source(people_source())
            .build()
            .unwrap();
        let results: Vec<Result<Person>> = reader.rows(ReadSheet::index(0)).unwrap().collect();
        assert!(results[0].is_ok());
        match &results[1] {
            Err(ExcelError::Conversion {
                sheet, row, column, field, ..
            }) => {
                assert_eq!(sheet, "Sheet1");
                assert_eq!(*row, 4);
                assert_eq!(column, "A");
                assert_eq!(field, "age");
            }
            other => panic!("unexpected {:?}", other.as_ref().map(|_| ())),
        }
    }

    #[test]
    fn test_skip_row_policy() {
        let mut reader = ReaderBuilder::<Person>::from_source(people_source())
            .with_error_policy(ErrorPolicy::SkipRow)
            .build()
            .unwrap();
        let count = reader.rows(ReadSheet::index(0)).unwrap().filter(|r| r.is_ok()).count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_empty_rows_are_synthesized_when_kept() {
        let mut reader = ReaderBuilder::<Record>::from_source(people_source())
            .with_ignore_empty_rows(false)
            .build()
            .unwrap();
        let records: Vec<Record> = reader.rows(ReadSheet::index(0)).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].get("Age"), Some(&Value::Null));
        assert_eq!(records[2].get("Name"), Some(&Value::Text("Bob".into())));
    }

    #[test]
    fn test_dynamic_schema_names_columns() {
        let source = MemorySource::single(vec![
            row(0, vec!["id".into()]),
            row(1, vec![CellValue::Number(1.0), "extra".into()]),
        ]);
        let mut reader = ReaderBuilder::<Record>::from_source(source).build().unwrap();
        let records: Vec<Record> = reader.rows(ReadSheet::index(0)).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(
            records[0].names().collect::<Vec<_>>(),
            vec!["id", "B"]
        );
        assert_eq!(records[0].get("id"), Some(&Value::Text("1".into())));
    }

    #[test]
    fn test_listener_stop_and_header() {
        let mut reader = ReaderBuilder::<Person>::from_source(people_source())
            .with_error_policy(ErrorPolicy::UseDefault)
            .build()
            .unwrap();

        struct Collect {
            header: Vec<String>,
            names: Vec<String>,
        }

        impl ReadListener<Person> for Collect {
            fn on_header(&mut self, header: &[String], _: &ReadContext) -> Result<()> {
                self.header = header.to_vec();
                Ok(())
            }

            fn on_row(&mut self, row: Person, _: &ReadContext) -> Result<Flow> {
                self.names.push(row.name);
                Ok(Flow::Stop)
            }
        }

        let mut listener = Collect {
            header: Vec::new(),
            names: Vec::new(),
        };
        let summary = reader.read_sheet(ReadSheet::index(0), &mut listener).unwrap();
        assert!(summary.stopped);
        assert_eq!(summary.rows, 1);
        assert_eq!(listener.header, vec!["Age", "Name"]);
        assert_eq!(listener.names, vec!["Alice"]);
    }

    #[test]
    fn test_sheet_override_and_registration_rules() {
        let mut reader = ReaderBuilder::<Person>::from_source(people_source())
            .with_error_policy(ErrorPolicy::UseDefault)
            .build()
            .unwrap();
        reader.register_converter(Shout).unwrap();
        assert!(reader.context().converter_registry().contains_type::<Shout>());

        let names: Vec<String> = reader
            .rows(ReadSheet::index(0))
            .unwrap()
            .map(|p| p.unwrap().name)
            .collect();
        assert_eq!(names, vec!["ALICE", "BOB"]);

        let err = reader.register_converter(Shout).unwrap_err();
        assert!(matches!(err, ExcelError::Configuration(_)));

        let mut reader = ReaderBuilder::<Person>::from_source(people_source())
            .with_error_policy(ErrorPolicy::UseDefault)
            .register_converter(Shout)
            .build()
            .unwrap();
        let names: Vec<String> = reader
            .rows(ReadSheet::index(0).config(HolderConfig::new().use_default_converter(true)))
            .unwrap()
            .map(|p| p.unwrap().name)
            .collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
    }

    #[test]
    fn test_closed_session() {
        let mut reader = ReaderBuilder::<Person>::from_source(people_source())
            .with_error_policy(ErrorPolicy::UseDefault)
            .build()
            .unwrap();
        let mut seen = 0;
        reader
            .read_all(&mut |_: Person| {
                seen += 1;
                Ok(Flow::Continue)
            })
            .unwrap();
        assert_eq!(seen, 2);
        assert_eq!(reader.context().session_state(), SessionState::Finished);
        assert!(matches!(reader.rows(ReadSheet::index(0)).err(), Some(ExcelError::SessionClosed(_))));
        assert!(matches!(
            reader.register_converter(Shout),
            Err(ExcelError::SessionClosed(_))
        ));
        assert!(reader.finish().is_err());
    }

    #[test]
    fn test_sheet_is_read_once() {
        let mut reader = ReaderBuilder::<Person>::from_source(people_source())
            .with_error_policy(ErrorPolicy::UseDefault)
            .build()
            .unwrap();
        assert_eq!(reader.rows(ReadSheet::index(0)).unwrap().count(), 2);
        assert!(reader.is_consumed(0));
        assert!(matches!(
            reader.rows("Sheet1").err(),
            Some(ExcelError::Configuration(_))
        ));

        let mut seen = 0;
        reader
            .read_all(&mut |_: Person| {
                seen += 1;
                Ok(Flow::Continue)
            })
            .unwrap();
        assert_eq!(seen, 0);
    }

    #[derive(Debug)]
    struct Twice {
        name: Value,
        copy: Value,
    }

    impl ExcelRow for Twice {
        fn schema() -> Schema {
            Schema::new(vec![
                FieldDescriptor::new("name", AppKind::Text).header("Name"),
                FieldDescriptor::new("copy", AppKind::Text).column(1),
            ])
        }

        fn from_record(mut record: Record) -> Result<Self> {
            Ok(Twice {
                name: record.take("name")?,
                copy: record.take("copy")?,
            })
        }

        fn to_record(&self) -> Record {
            Record::new()
                .with("name", self.name.clone())
                .with("copy", self.copy.clone())
        }
    }

    #[test]
    fn test_two_fields_on_one_column_rejected() {
        let mut reader = ReaderBuilder::<Twice>::from_source(people_source())
            .build()
            .unwrap();
        let mut rows = reader.rows(ReadSheet::index(0)).unwrap();
        match rows.next() {
            Some(Err(ExcelError::Configuration(msg))) => {
                assert!(msg.contains("'name'"));
                assert!(msg.contains("'copy'"));
            }
            other => panic!("unexpected {:?}", other.map(|r| r.map(|_| ()))),
        }
        assert!(rows.next().is_none());
    }

    /// Two sheets; the first one breaks after its header
    struct BrokenSource {
        sheets: Vec<SheetInfo>,
    }

    impl SheetSource for BrokenSource {
        fn sheets(&self) -> &[SheetInfo] {
            &self.sheets
        }

        fn rows(&mut self, index: usize) -> Result<SheetRows<'_>> {
            let header = Ok(row(0, vec!["Name".into()]));
            if index == 0 {
                let broken = Err(ExcelError::MalformedDocument("unterminated cell".into()));
                Ok(Box::new(vec![header, broken].into_iter()))
            } else {
                let body = Ok(row(1, vec!["Carol".into()]));
                Ok(Box::new(vec![header, body].into_iter()))
            }
        }
    }

    #[test]
    fn test_malformed_sheet_ends_session() {
        let source = BrokenSource {
            sheets: ["Broken", "Fine"]
                .iter()
                .enumerate()
                .map(|(i, name)| SheetInfo {
                    name: name.to_string(),
                    path: format!("xl/worksheets/sheet{}.xml", i + 1),
                })
                .collect(),
        };
        let mut reader = ReaderBuilder::<Record>::from_source(source).build().unwrap();
        let results: Vec<Result<Record>> = reader.rows(ReadSheet::index(0)).unwrap().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(ExcelError::MalformedDocument(_))));
        assert_eq!(reader.context().state(), ReadState::Error);

        assert!(matches!(
            reader.rows(ReadSheet::index(1)).err(),
            Some(ExcelError::SessionClosed(_))
        ));
        let mut seen = 0;
        let err = reader
            .read_sheet("Fine", &mut |_: Record| {
                seen += 1;
                Ok(Flow::Continue)
            })
            .unwrap_err();
        assert!(matches!(err, ExcelError::SessionClosed(_)));
        assert_eq!(seen, 0);
        reader.finish().unwrap();
    }

    /// Rows generated on demand, counting how many have been produced
    struct CountingSource {
        sheets: Vec<SheetInfo>,
        total: u32,
        produced: Arc<AtomicU32>,
    }

    impl SheetSource for CountingSource {
        fn sheets(&self) -> &[SheetInfo] {
            &self.sheets
        }

        fn rows(&mut self, _index: usize) -> Result<SheetRows<'_>> {
            let produced = Arc::clone(&self.produced);
            Ok(Box::new((0..self.total).map(move |i| {
                produced.fetch_add(1, Ordering::SeqCst);
                let cell = if i == 0 {
                    CellValue::from("n")
                } else {
                    CellValue::Number(i as f64)
                };
                Ok(row(i, vec![cell]))
            })))
        }
    }

    #[test]
    fn test_rows_are_pulled_one_at_a_time() {
        let produced = Arc::new(AtomicU32::new(0));
        let source = CountingSource {
            sheets: vec![SheetInfo {
                name: "Big".into(),
                path: "xl/worksheets/sheet1.xml".into(),
            }],
            total: 200_000,
            produced: Arc::clone(&produced),
        };
        let mut reader = ReaderBuilder::<Record>::from_source(source).build().unwrap();
        let mut delivered = 0u32;
        for record in reader.rows(ReadSheet::index(0)).unwrap() {
            let record = record.unwrap();
            delivered += 1;
            assert_eq!(record.get("n"), Some(&Value::Text(delivered.to_string())));
            // header row plus the row just delivered
            assert_eq!(produced.load(Ordering::SeqCst), delivered + 1);
        }
        assert_eq!(delivered, 199_999);
    }

    #[test]
    fn test_unsorted_source_cells() {
        let source = MemorySource::single(vec![
            row(0, vec!["a".into(), "b".into(), "c".into()]),
            SheetRow {
                index: 1,
                cells: vec![
                    SheetCell::new(2, "z".into()),
                    SheetCell::new(0, "x".into()),
                ],
            },
        ]);
        let mut reader = ReaderBuilder::<Record>::from_source(source).build().unwrap();
        let records: Vec<Record> = reader.rows(ReadSheet::index(0)).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(records[0].get("a"), Some(&Value::Text("x".into())));
        assert_eq!(records[0].get("c"), Some(&Value::Text("z".into())));
    }

    #[test]
    fn test_unknown_sheet() {
        let mut reader = ReaderBuilder::<Person>::from_source(people_source())
            .build()
            .unwrap();
        assert!(matches!(
            reader.rows("Missing").err(),
            Some(ExcelError::SheetNotFound { .. })
        ));
    }
}
