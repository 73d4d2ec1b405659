//! Conversion between raw cells and application values
//!
//! A [`Converter`] is registered under the application kind and cell kind it
//! supports. Converters are stateless: anything session-specific arrives through
//! [`FieldConfig`] and [`GlobalConfig`], so one instance can serve any number of
//! concurrently open sessions.

pub mod builtin;
pub mod registry;

use crate::error::{ExcelError, Result};
use crate::types::{CellKind, CellValue};
use crate::value::{AppKind, Value};

pub use builtin::BuiltinConverter;
pub use registry::ConverterRegistry;

/// Field-level configuration handed to a converter
#[derive(Debug, Clone, Copy)]
pub struct FieldConfig<'a> {
    pub name: &'a str,
    pub kind: AppKind,
    /// Resolved date/number pattern (field, then sheet, then session)
    pub format: Option<&'a str>,
}

impl<'a> FieldConfig<'a> {
    pub fn new(name: &'a str, kind: AppKind) -> Self {
        FieldConfig {
            name,
            kind,
            format: None,
        }
    }

    pub fn with_format(mut self, format: Option<&'a str>) -> Self {
        self.format = format;
        self
    }
}

/// Session-wide configuration handed to a converter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlobalConfig {
    /// Trim surrounding whitespace from text
    pub auto_trim: bool,
    /// Workbook uses the 1904 date system
    pub date1904: bool,
}

/// Bidirectional mapping between one application kind and one cell kind
///
/// Both directions have a default that rejects the call, so a converter that is
/// only used for reading (or writing) implements a single method.
///
/// ```
/// use excelmap::{AppKind, CellKind, CellValue, Converter, FieldConfig, GlobalConfig, Result, Value};
///
/// struct Prefixed;
///
/// impl Converter for Prefixed {
///     fn app_kind(&self) -> AppKind {
///         AppKind::Text
///     }
///
///     fn cell_kind(&self) -> CellKind {
///         CellKind::String
///     }
///
///     fn to_cell(&self, value: &Value, _: &FieldConfig<'_>, _: &GlobalConfig) -> Result<CellValue> {
///         Ok(CellValue::String(format!("A-{}", value)))
///     }
/// }
/// ```
pub trait Converter: Send + Sync {
    /// Application kind this converter produces/consumes
    fn app_kind(&self) -> AppKind;

    /// Cell kind this converter reads/writes
    fn cell_kind(&self) -> CellKind;

    /// Cell -> application value
    fn to_value(
        &self,
        cell: &CellValue,
        field: &FieldConfig<'_>,
        global: &GlobalConfig,
    ) -> Result<Value> {
        let _ = (cell, field, global);
        Err(ExcelError::InvalidValue(format!(
            "converter {} does not support reading",
            self.name()
        )))
    }

    /// Application value -> cell
    fn to_cell(
        &self,
        value: &Value,
        field: &FieldConfig<'_>,
        global: &GlobalConfig,
    ) -> Result<CellValue> {
        let _ = (value, field, global);
        Err(ExcelError::InvalidValue(format!(
            "converter {} does not support writing",
            self.name()
        )))
    }

    /// Name used for introspection and logging
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Outcome of converter resolution for one field
#[derive(Clone)]
pub enum Resolved {
    /// Raw pass-through: the cell is kept as `Value::Cell` on read and the
    /// value's natural cell is emitted on write
    Identity,
    Converter(std::sync::Arc<dyn Converter>),
}

impl Resolved {
    pub fn read(
        &self,
        cell: &CellValue,
        field: &FieldConfig<'_>,
        global: &GlobalConfig,
    ) -> Result<Value> {
        match self {
            Resolved::Identity => Ok(Value::Cell(cell.clone())),
            Resolved::Converter(converter) => converter.to_value(cell, field, global),
        }
    }

    pub fn write(
        &self,
        value: &Value,
        field: &FieldConfig<'_>,
        global: &GlobalConfig,
    ) -> Result<CellValue> {
        match self {
            Resolved::Identity => builtin::natural_cell(value, global),
            Resolved::Converter(converter) => converter.to_cell(value, field, global),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Resolved::Identity => "identity",
            Resolved::Converter(converter) => converter.name(),
        }
    }
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
