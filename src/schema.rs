//! Mapped-type descriptions
//!
//! A [`Schema`] is the structural description of the rows a session reads or
//! writes. It is finalized before the session is built and never changes after.

use crate::converter::Converter;
use crate::error::Result;
use crate::value::{AppKind, Record, Value};
use std::fmt;
use std::sync::Arc;

/// Description of one mapped field
#[derive(Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: AppKind,
    /// Explicit 0-based column; otherwise matched by header text, then by position
    pub column: Option<u32>,
    /// Header text; defaults to the field name
    pub header: Option<String>,
    /// Date or number pattern for this field
    pub format: Option<String>,
    /// Converter used for this field regardless of any other registration
    pub converter: Option<Arc<dyn Converter>>,
    /// Skip overrides and use the built-in converter
    pub use_default_converter: bool,
    /// Identity pass-through: the raw cell is kept as `Value::Cell`
    pub raw: bool,
    /// Value substituted under `ErrorPolicy::UseDefault`
    pub default: Option<Value>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: AppKind) -> Self {
        FieldDescriptor {
            name: name.into(),
            kind,
            column: None,
            header: None,
            format: None,
            converter: None,
            use_default_converter: false,
            raw: false,
            default: None,
        }
    }

    pub fn column(mut self, column: u32) -> Self {
        self.column = Some(column);
        self
    }

    pub fn header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    pub fn format(mut self, pattern: impl Into<String>) -> Self {
        self.format = Some(pattern.into());
        self
    }

    pub fn converter(mut self, converter: impl Converter + 'static) -> Self {
        self.converter = Some(Arc::new(converter));
        self
    }

    pub fn use_default_converter(mut self) -> Self {
        self.use_default_converter = true;
        self
    }

    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Header text written and matched for this field
    pub fn header_text(&self) -> &str {
        self.header.as_deref().unwrap_or(&self.name)
    }

    /// Value used when a conversion fails under the "default on error" policy
    pub fn fallback_value(&self) -> Value {
        self.default
            .clone()
            .unwrap_or_else(|| self.kind.default_value())
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("column", &self.column)
            .field("header", &self.header)
            .field("format", &self.format)
            .field("converter", &self.converter.as_ref().map(|c| c.name()))
            .field("use_default_converter", &self.use_default_converter)
            .field("raw", &self.raw)
            .finish()
    }
}

/// Ordered set of mapped fields
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<FieldDescriptor>,
    dynamic: bool,
}

impl Schema {
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        Schema {
            fields,
            dynamic: false,
        }
    }

    /// Schema discovered from the document (read) or from each record (write)
    pub fn dynamic() -> Self {
        Schema {
            fields: Vec::new(),
            dynamic: true,
        }
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A Rust type that maps to one spreadsheet row
///
/// ```
/// use excelmap::{AppKind, ExcelRow, FieldDescriptor, Record, Result, Schema};
///
/// struct Person {
///     name: String,
///     age: Option<i64>,
/// }
///
/// impl ExcelRow for Person {
///     fn schema() -> Schema {
///         Schema::new(vec![
///             FieldDescriptor::new("name", AppKind::Text).header("Name"),
///             FieldDescriptor::new("age", AppKind::Integer).header("Age"),
///         ])
///     }
///
///     fn from_record(mut record: Record) -> Result<Self> {
///         Ok(Person {
///             name: record.take("name")?,
///             age: record.take("age")?,
///         })
///     }
///
///     fn to_record(&self) -> Record {
///         Record::new()
///             .with("name", self.name.as_str())
///             .with("age", self.age)
///     }
/// }
/// ```
pub trait ExcelRow: Sized {
    fn schema() -> Schema;

    fn from_record(record: Record) -> Result<Self>;

    fn to_record(&self) -> Record;
}

impl ExcelRow for Record {
    fn schema() -> Schema {
        Schema::dynamic()
    }

    fn from_record(record: Record) -> Result<Self> {
        Ok(record)
    }

    fn to_record(&self) -> Record {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_builder() {
        let field = FieldDescriptor::new("born", AppKind::Date)
            .header("Born")
            .format("%d/%m/%Y")
            .column(3);
        assert_eq!(field.header_text(), "Born");
        assert_eq!(field.column, Some(3));
        assert_eq!(field.format.as_deref(), Some("%d/%m/%Y"));
        assert_eq!(field.fallback_value(), Value::Null);
    }

    #[test]
    fn test_fallback_uses_configured_default() {
        let field = FieldDescriptor::new("qty", AppKind::Integer).default_value(Value::Integer(-1));
        assert_eq!(field.fallback_value(), Value::Integer(-1));
        assert_eq!(
            FieldDescriptor::new("qty", AppKind::Integer).fallback_value(),
            Value::Integer(0)
        );
    }

    #[test]
    fn test_empty_schema_is_not_dynamic() {
        assert!(!Schema::new(Vec::new()).is_dynamic());
        assert!(Record::schema().is_dynamic());
    }
}
