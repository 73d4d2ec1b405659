//! Application-level values and rows
//!
//! A [`Value`] is what a converter produces from a cell on read and consumes on
//! write. A [`Record`] is one application row: field name -> value, in field order.

use crate::error::{ExcelError, Result};
use crate::types::CellValue;
use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use std::fmt;

/// Application type a field maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AppKind {
    Text,
    Integer,
    Float,
    Boolean,
    DateTime,
    Date,
    /// The raw cell, no conversion
    Cell,
}

impl AppKind {
    /// Default substituted for a failed cell under `ErrorPolicy::UseDefault`
    pub fn default_value(self) -> Value {
        match self {
            AppKind::Text => Value::Text(String::new()),
            AppKind::Integer => Value::Integer(0),
            AppKind::Float => Value::Float(0.0),
            AppKind::Boolean => Value::Boolean(false),
            AppKind::DateTime | AppKind::Date | AppKind::Cell => Value::Null,
        }
    }
}

impl fmt::Display for AppKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One application value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Cell(CellValue),
}

impl Value {
    /// Application kind this value naturally belongs to; `None` for `Null`
    pub fn kind(&self) -> Option<AppKind> {
        match self {
            Value::Null => None,
            Value::Text(_) => Some(AppKind::Text),
            Value::Integer(_) => Some(AppKind::Integer),
            Value::Float(_) => Some(AppKind::Float),
            Value::Boolean(_) => Some(AppKind::Boolean),
            Value::DateTime(_) => Some(AppKind::DateTime),
            Value::Date(_) => Some(AppKind::Date),
            Value::Cell(_) => Some(AppKind::Cell),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn describe(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Text(_) => "text",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Boolean(_) => "boolean",
            Value::DateTime(_) => "date-time",
            Value::Date(_) => "date",
            Value::Cell(_) => "cell",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Text(s) => f.write_str(s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Cell(c) => write!(f, "{}", c),
        }
    }
}

/// Extract a Rust value out of a [`Value`]
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

/// Turn a Rust value into a [`Value`]
pub trait IntoValue {
    fn into_value(self) -> Value;
}

fn mismatch<T>(expected: &str, got: &Value) -> Result<T> {
    Err(ExcelError::InvalidValue(format!(
        "expected {}, found {}",
        expected,
        got.describe()
    )))
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s),
            Value::Null => Ok(String::new()),
            other => Ok(other.to_string()),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Integer(i) => Ok(i),
            other => mismatch("integer", &other),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide)
            .map_err(|_| ExcelError::InvalidValue(format!("{} does not fit in i32", wide)))
    }
}

impl FromValue for u32 {
    fn from_value(value: Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        u32::try_from(wide)
            .map_err(|_| ExcelError::InvalidValue(format!("{} does not fit in u32", wide)))
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Integer(i) => Ok(i as f64),
            other => mismatch("float", &other),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Boolean(b) => Ok(b),
            other => mismatch("boolean", &other),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::DateTime(dt) => Ok(dt),
            Value::Date(d) => Ok(d.and_time(chrono::NaiveTime::MIN)),
            other => mismatch("date-time", &other),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Date(d) => Ok(d),
            Value::DateTime(dt) => Ok(dt.date()),
            other => mismatch("date", &other),
        }
    }
}

impl FromValue for CellValue {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Cell(c) => Ok(c),
            Value::Null => Ok(CellValue::Empty),
            other => mismatch("cell", &other),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

macro_rules! into_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl IntoValue for $ty {
                fn into_value(self) -> Value {
                    Value::$variant(self.into())
                }
            }
        )*
    };
}

into_value! {
    String => Text,
    &str => Text,
    i64 => Integer,
    i32 => Integer,
    u32 => Integer,
    f64 => Float,
    bool => Boolean,
    NaiveDateTime => DateTime,
    NaiveDate => Date,
    CellValue => Cell,
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Null,
        }
    }
}

/// One application row, keyed by field name in field order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    values: IndexMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Record::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Record {
            values: IndexMap::with_capacity(capacity),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl IntoValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl IntoValue) {
        self.values.insert(name.into(), value.into_value());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Remove a field and convert it; a missing field is read as `Null`
    pub fn take<T: FromValue>(&mut self, name: &str) -> Result<T> {
        let value = self.values.shift_remove(name).unwrap_or(Value::Null);
        T::from_value(value)
            .map_err(|e| ExcelError::InvalidValue(format!("field '{}': {}", name, e)))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Convert row to vector of display strings
    pub fn to_strings(&self) -> Vec<String> {
        self.values.values().map(|v| v.to_string()).collect()
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Record {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
