//! Built-in converters seeded into every registry

use super::{Converter, FieldConfig, GlobalConfig};
use crate::error::{ExcelError, Result};
use crate::types::{CellKind, CellValue};
use crate::value::{AppKind, Value};
use chrono::format::{Item, StrftimeItems};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

/// Date patterns tried, in order, when a string cell has no configured pattern
pub const DEFAULT_DATE_PATTERNS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d",
];

/// Read pairs covered by the built-ins
pub(crate) const READ_PAIRS: &[(AppKind, CellKind)] = &[
    (AppKind::Text, CellKind::String),
    (AppKind::Text, CellKind::Number),
    (AppKind::Text, CellKind::Boolean),
    (AppKind::Text, CellKind::Error),
    (AppKind::Integer, CellKind::Number),
    (AppKind::Integer, CellKind::String),
    (AppKind::Integer, CellKind::Boolean),
    (AppKind::Float, CellKind::Number),
    (AppKind::Float, CellKind::String),
    (AppKind::Float, CellKind::Boolean),
    (AppKind::Boolean, CellKind::Boolean),
    (AppKind::Boolean, CellKind::Number),
    (AppKind::Boolean, CellKind::String),
    (AppKind::DateTime, CellKind::Number),
    (AppKind::DateTime, CellKind::String),
    (AppKind::Date, CellKind::Number),
    (AppKind::Date, CellKind::String),
];

/// Write converters, one per application kind, keyed by the cell kind they emit
pub(crate) const WRITE_PAIRS: &[(AppKind, CellKind)] = &[
    (AppKind::Text, CellKind::String),
    (AppKind::Integer, CellKind::Number),
    (AppKind::Float, CellKind::Number),
    (AppKind::Boolean, CellKind::Boolean),
    (AppKind::DateTime, CellKind::Number),
    (AppKind::Date, CellKind::Number),
];

/// Stateless converter for one built-in (application kind, cell kind) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinConverter {
    app: AppKind,
    cell: CellKind,
}

impl BuiltinConverter {
    pub fn new(app: AppKind, cell: CellKind) -> Self {
        BuiltinConverter { app, cell }
    }
}

impl Converter for BuiltinConverter {
    fn app_kind(&self) -> AppKind {
        self.app
    }

    fn cell_kind(&self) -> CellKind {
        self.cell
    }

    fn to_value(
        &self,
        cell: &CellValue,
        field: &FieldConfig<'_>,
        global: &GlobalConfig,
    ) -> Result<Value> {
        if let CellValue::Empty = cell {
            return Ok(Value::Null);
        }
        match self.app {
            AppKind::Text => read_text(cell, field, global),
            AppKind::Integer => read_integer(cell),
            AppKind::Float => read_float(cell),
            AppKind::Boolean => read_boolean(cell),
            AppKind::DateTime => read_datetime(cell, field, global).map(Value::DateTime),
            AppKind::Date => read_datetime(cell, field, global).map(|dt| Value::Date(dt.date())),
            AppKind::Cell => Ok(Value::Cell(cell.clone())),
        }
    }

    fn to_cell(
        &self,
        value: &Value,
        field: &FieldConfig<'_>,
        global: &GlobalConfig,
    ) -> Result<CellValue> {
        match (self.app, value) {
            (_, Value::Null) => Ok(CellValue::Empty),
            (AppKind::Text, Value::Text(_)) | (AppKind::Text, Value::Cell(_)) => {
                natural_cell(value, global)
            }
            (AppKind::Text, other) => Ok(CellValue::String(other.to_string())),
            (_, Value::Integer(i)) => match field.format.and_then(|p| format_number(*i as f64, p)) {
                Some(text) => Ok(CellValue::String(text)),
                None => natural_cell(value, global),
            },
            (_, Value::Float(f)) => match field.format.and_then(|p| format_number(*f, p)) {
                Some(text) => Ok(CellValue::String(text)),
                None => natural_cell(value, global),
            },
            (_, Value::DateTime(dt)) => match field.format {
                Some(pattern) => format_date(dt, pattern).map(CellValue::String),
                None => natural_cell(value, global),
            },
            (_, Value::Date(d)) => match field.format {
                Some(pattern) => {
                    format_date(&d.and_time(NaiveTime::MIN), pattern).map(CellValue::String)
                }
                None => natural_cell(value, global),
            },
            _ => natural_cell(value, global),
        }
    }

    fn name(&self) -> &str {
        "builtin"
    }
}

/// Largest magnitude an `f64` cell holds every integer up to
pub const MAX_EXACT_INTEGER: u64 = 1 << 53;

/// The cell a value maps to with no converter involved
///
/// Integers a number cell cannot hold exactly are stored as their decimal text.
pub fn natural_cell(value: &Value, global: &GlobalConfig) -> Result<CellValue> {
    match value {
        Value::Null => Ok(CellValue::Empty),
        Value::Text(s) if global.auto_trim => Ok(CellValue::String(s.trim().to_string())),
        Value::Text(s) => Ok(CellValue::String(s.clone())),
        Value::Integer(i) if i.unsigned_abs() > MAX_EXACT_INTEGER => {
            let mut buffer = itoa::Buffer::new();
            Ok(CellValue::String(buffer.format(*i).to_string()))
        }
        Value::Integer(i) => Ok(CellValue::Number(*i as f64)),
        Value::Float(f) if !f.is_finite() => Err(ExcelError::InvalidValue(format!(
            "{} cannot be stored in a cell",
            f
        ))),
        Value::Float(f) => Ok(CellValue::Number(*f)),
        Value::Boolean(b) => Ok(CellValue::Boolean(*b)),
        Value::DateTime(dt) => datetime_to_serial(dt, global.date1904).map(CellValue::Number),
        Value::Date(d) => {
            datetime_to_serial(&d.and_time(NaiveTime::MIN), global.date1904).map(CellValue::Number)
        }
        Value::Cell(c) => Ok(c.clone()),
    }
}

fn read_text(cell: &CellValue, field: &FieldConfig<'_>, global: &GlobalConfig) -> Result<Value> {
    let text = match cell {
        CellValue::String(_) | CellValue::DirectString(_) | CellValue::RichString(_) => {
            cell.text().unwrap_or_default()
        }
        CellValue::Number(n) => field
            .format
            .and_then(|p| format_number(*n, p))
            .unwrap_or_else(|| number_text(*n)),
        CellValue::Boolean(b) => b.to_string(),
        CellValue::Error(code) => code.clone(),
        other => return Err(unsupported(AppKind::Text, other)),
    };
    if global.auto_trim {
        Ok(Value::Text(text.trim().to_string()))
    } else {
        Ok(Value::Text(text))
    }
}

fn read_integer(cell: &CellValue) -> Result<Value> {
    let number = match cell {
        CellValue::Number(n) => *n,
        CellValue::Boolean(b) => return Ok(Value::Integer(i64::from(*b))),
        CellValue::String(_) | CellValue::DirectString(_) | CellValue::RichString(_) => {
            let text = cell.text().unwrap_or_default();
            let trimmed = text.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(Value::Integer(i));
            }
            parse_number(trimmed)?
        }
        other => return Err(unsupported(AppKind::Integer, other)),
    };
    let truncated = number.trunc();
    if !truncated.is_finite() || truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(ExcelError::InvalidValue(format!(
            "{} is out of integer range",
            number
        )));
    }
    Ok(Value::Integer(truncated as i64))
}

fn read_float(cell: &CellValue) -> Result<Value> {
    match cell {
        CellValue::Number(n) => Ok(Value::Float(*n)),
        CellValue::Boolean(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        CellValue::String(_) | CellValue::DirectString(_) | CellValue::RichString(_) => {
            parse_number(&cell.text().unwrap_or_default()).map(Value::Float)
        }
        other => Err(unsupported(AppKind::Float, other)),
    }
}

fn read_boolean(cell: &CellValue) -> Result<Value> {
    match cell {
        CellValue::Boolean(b) => Ok(Value::Boolean(*b)),
        CellValue::Number(n) => Ok(Value::Boolean(*n != 0.0)),
        CellValue::String(_) | CellValue::DirectString(_) | CellValue::RichString(_) => {
            let text = cell.text().unwrap_or_default();
            match text.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Boolean(true)),
                "false" | "no" | "0" => Ok(Value::Boolean(false)),
                _ => Err(ExcelError::InvalidValue(format!(
                    "'{}' is not a boolean",
                    text
                ))),
            }
        }
        other => Err(unsupported(AppKind::Boolean, other)),
    }
}

fn read_datetime(
    cell: &CellValue,
    field: &FieldConfig<'_>,
    global: &GlobalConfig,
) -> Result<NaiveDateTime> {
    match cell {
        CellValue::Number(n) => serial_to_datetime(*n, global.date1904),
        CellValue::String(_) | CellValue::DirectString(_) | CellValue::RichString(_) => {
            let text = cell.text().unwrap_or_default();
            parse_datetime(text.trim(), field.format)
        }
        other => Err(unsupported(field.kind, other)),
    }
}

fn unsupported(app: AppKind, cell: &CellValue) -> ExcelError {
    ExcelError::InvalidValue(format!("cannot read {} cell as {}", cell.kind(), app))
}

/// Render a number the way it is typed in a cell: integral values have no decimal point
pub fn number_text(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        let mut buffer = itoa::Buffer::new();
        buffer.format(n as i64).to_string()
    } else {
        n.to_string()
    }
}

/// Lenient numeric parse: grouping commas are dropped, a trailing '%' divides by 100
pub fn parse_number(text: &str) -> Result<f64> {
    let cleaned: String = text.trim().chars().filter(|c| *c != ',').collect();
    let (digits, scale) = match cleaned.strip_suffix('%') {
        Some(rest) => (rest.trim_end(), 100.0),
        None => (cleaned.as_str(), 1.0),
    };
    digits
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .map(|n| n / scale)
        .ok_or_else(|| ExcelError::InvalidValue(format!("'{}' is not a number", text)))
}

/// Format with a numeric pattern (`0`, `0.00`, `#,##0.0`, optional trailing `%`).
/// Returns `None` when the pattern is not a numeric pattern.
pub fn format_number(value: f64, pattern: &str) -> Option<String> {
    let (body, percent) = match pattern.strip_suffix('%') {
        Some(rest) => (rest, true),
        None => (pattern, false),
    };
    if body.is_empty() || !body.chars().all(|c| matches!(c, '0' | '#' | ',' | '.')) {
        return None;
    }
    let decimals = body
        .split_once('.')
        .map(|(_, frac)| frac.chars().filter(|c| matches!(c, '0' | '#')).count())
        .unwrap_or(0);
    let grouped = body.split('.').next().is_some_and(|int| int.contains(','));
    let scaled = if percent { value * 100.0 } else { value };

    let rendered = format!("{:.*}", decimals, scaled.abs());
    let (int_part, frac_part) = match rendered.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (rendered.as_str(), None),
    };

    let mut out = String::with_capacity(rendered.len() + 4);
    if scaled < 0.0 && rendered.chars().any(|c| c.is_ascii_digit() && c != '0') {
        out.push('-');
    }
    if grouped {
        for (i, ch) in int_part.chars().enumerate() {
            if i > 0 && (int_part.len() - i) % 3 == 0 {
                out.push(',');
            }
            out.push(ch);
        }
    } else {
        out.push_str(int_part);
    }
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(frac);
    }
    if percent {
        out.push('%');
    }
    Some(out)
}

fn format_date(dt: &NaiveDateTime, pattern: &str) -> Result<String> {
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(ExcelError::InvalidValue(format!(
            "invalid date pattern '{}'",
            pattern
        )));
    }
    Ok(dt.format(pattern).to_string())
}

fn parse_datetime(text: &str, pattern: Option<&str>) -> Result<NaiveDateTime> {
    let patterns: &[&str] = match pattern {
        Some(ref p) => std::slice::from_ref(p),
        None => DEFAULT_DATE_PATTERNS,
    };
    for pattern in patterns {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, pattern) {
            return Ok(dt);
        }
        if let Ok(d) = NaiveDate::parse_from_str(text, pattern) {
            return Ok(d.and_time(NaiveTime::MIN));
        }
    }
    Err(ExcelError::InvalidValue(format!(
        "'{}' does not match date pattern {}",
        text,
        patterns.join(" | ")
    )))
}

const MS_PER_DAY: f64 = 86_400_000.0;

fn ymd(year: i32, month: u32, day: u32) -> Result<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month, day)
        .map(|d| d.and_time(NaiveTime::MIN))
        .ok_or_else(|| ExcelError::InvalidValue(format!("invalid date {}-{}-{}", year, month, day)))
}

/// Epoch for a serial in the given date system.
///
/// The 1900 system counts a non-existent 1900-02-29 (serial 60), so serials
/// before it are offset by one day.
fn epoch(date1904: bool, before_leap_bug: bool) -> Result<NaiveDateTime> {
    if date1904 {
        ymd(1904, 1, 1)
    } else if before_leap_bug {
        ymd(1899, 12, 31)
    } else {
        ymd(1899, 12, 30)
    }
}

/// Spreadsheet serial number -> date-time, rounded to the millisecond
pub fn serial_to_datetime(serial: f64, date1904: bool) -> Result<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 || serial > 2_958_466.0 {
        return Err(ExcelError::InvalidValue(format!(
            "{} is not a valid date serial",
            serial
        )));
    }
    let base = epoch(date1904, !date1904 && serial < 60.0)?;
    let millis = (serial * MS_PER_DAY).round() as i64;
    Ok(base + Duration::milliseconds(millis))
}

/// Date-time -> spreadsheet serial number
pub fn datetime_to_serial(dt: &NaiveDateTime, date1904: bool) -> Result<f64> {
    let leap_bug_start = ymd(1900, 3, 1)?;
    let base = epoch(date1904, !date1904 && *dt < leap_bug_start)?;
    let millis = dt.signed_duration_since(base).num_milliseconds();
    if millis < 0 {
        return Err(ExcelError::InvalidValue(format!(
            "{} is before the workbook epoch",
            dt
        )));
    }
    Ok(millis as f64 / MS_PER_DAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn field(kind: AppKind) -> FieldConfig<'static> {
        FieldConfig::new("f", kind)
    }

    fn read(app: AppKind, cell: CellValue) -> Result<Value> {
        BuiltinConverter::new(app, cell.kind()).to_value(
            &cell,
            &field(app),
            &GlobalConfig {
                auto_trim: true,
                date1904: false,
            },
        )
    }

    fn dt(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_serial_dates() {
        assert_eq!(serial_to_datetime(1.0, false).unwrap(), dt(1900, 1, 1, 0, 0, 0));
        assert_eq!(serial_to_datetime(61.0, false).unwrap(), dt(1900, 3, 1, 0, 0, 0));
        assert_eq!(
            serial_to_datetime(45292.5, false).unwrap(),
            dt(2024, 1, 1, 12, 0, 0)
        );
        assert_eq!(serial_to_datetime(0.0, true).unwrap(), dt(1904, 1, 1, 0, 0, 0));
        assert!(serial_to_datetime(-1.0, false).is_err());
    }

    #[test]
    fn test_serial_round_trip() {
        let moments = [
            dt(1900, 1, 15, 6, 0, 0),
            dt(1999, 12, 31, 23, 59, 59),
            dt(2024, 2, 29, 8, 30, 15),
        ];
        for moment in moments {
            for date1904 in [false, true] {
                if date1904 && moment.year() < 1904 {
                    continue;
                }
                let serial = datetime_to_serial(&moment, date1904).unwrap();
                assert_eq!(serial_to_datetime(serial, date1904).unwrap(), moment);
            }
        }
    }

    #[test]
    fn test_text_from_cells() {
        assert_eq!(
            read(AppKind::Text, CellValue::Number(42.0)).unwrap(),
            Value::Text("42".into())
        );
        assert_eq!(
            read(AppKind::Text, CellValue::Number(2.5)).unwrap(),
            Value::Text("2.5".into())
        );
        assert_eq!(
            read(AppKind::Text, CellValue::RichString(vec!["Hel".into(), "lo ".into()])).unwrap(),
            Value::Text("Hello".into())
        );
        assert_eq!(
            read(AppKind::Text, CellValue::Error("#N/A".into())).unwrap(),
            Value::Text("#N/A".into())
        );
    }

    #[test]
    fn test_integer_from_cells() {
        assert_eq!(
            read(AppKind::Integer, CellValue::Number(7.9)).unwrap(),
            Value::Integer(7)
        );
        assert_eq!(
            read(AppKind::Integer, CellValue::from(" 12 ")).unwrap(),
            Value::Integer(12)
        );
        assert_eq!(
            read(AppKind::Integer, CellValue::Boolean(true)).unwrap(),
            Value::Integer(1)
        );
        assert!(read(AppKind::Integer, CellValue::from("abc")).is_err());
        assert!(read(AppKind::Integer, CellValue::Number(1e300)).is_err());
    }

    #[test]
    fn test_boolean_and_float() {
        assert_eq!(
            read(AppKind::Boolean, CellValue::from("Yes")).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            read(AppKind::Boolean, CellValue::Number(0.0)).unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(
            read(AppKind::Float, CellValue::from("1,250.5")).unwrap(),
            Value::Float(1250.5)
        );
        assert_eq!(
            read(AppKind::Float, CellValue::from("12.5%")).unwrap(),
            Value::Float(0.125)
        );
    }

    #[test]
    fn test_date_from_string_with_pattern() {
        let converter = BuiltinConverter::new(AppKind::Date, CellKind::String);
        let field = field(AppKind::Date).with_format(Some("%d/%m/%Y"));
        let value = converter
            .to_value(&CellValue::from("31/12/2023"), &field, &GlobalConfig::default())
            .unwrap();
        assert_eq!(value, Value::Date(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()));

        let defaults = BuiltinConverter::new(AppKind::DateTime, CellKind::String);
        let value = defaults
            .to_value(
                &CellValue::from("2024/03/05"),
                &FieldConfig::new("f", AppKind::DateTime),
                &GlobalConfig::default(),
            )
            .unwrap();
        assert_eq!(value, Value::DateTime(dt(2024, 3, 5, 0, 0, 0)));
    }

    #[test]
    fn test_number_patterns() {
        assert_eq!(format_number(1234567.891, "#,##0.00").as_deref(), Some("1,234,567.89"));
        assert_eq!(format_number(3.6, "0").as_deref(), Some("4"));
        assert_eq!(format_number(0.256, "0.0%").as_deref(), Some("25.6%"));
        assert_eq!(format_number(-1234.0, "#,##0").as_deref(), Some("-1,234"));
        assert_eq!(format_number(1.0, "%Y-%m-%d"), None);
    }

    #[test]
    fn test_write_with_patterns() {
        let global = GlobalConfig::default();
        let float = BuiltinConverter::new(AppKind::Float, CellKind::Number);
        let cell = float
            .to_cell(
                &Value::Float(0.5),
                &field(AppKind::Float).with_format(Some("0%")),
                &global,
            )
            .unwrap();
        assert_eq!(cell, CellValue::String("50%".into()));

        let date = BuiltinConverter::new(AppKind::Date, CellKind::Number);
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(
            date.to_cell(&Value::Date(day), &field(AppKind::Date), &global)
                .unwrap(),
            CellValue::Number(45292.0)
        );
        assert_eq!(
            date.to_cell(
                &Value::Date(day),
                &field(AppKind::Date).with_format(Some("%d.%m.%Y")),
                &global
            )
            .unwrap(),
            CellValue::String("01.01.2024".into())
        );
    }

    #[test]
    fn test_text_converter_writes_any_value_as_string() {
        let text = BuiltinConverter::new(AppKind::Text, CellKind::String);
        let cell = text
            .to_cell(&Value::Integer(5), &field(AppKind::Text), &GlobalConfig::default())
            .unwrap();
        assert_eq!(cell, CellValue::String("5".into()));
    }

    #[test]
    fn test_large_integers_stay_exact() {
        let global = GlobalConfig::default();
        let edge = MAX_EXACT_INTEGER as i64;
        assert_eq!(
            natural_cell(&Value::Integer(edge), &global).unwrap(),
            CellValue::Number(edge as f64)
        );
        for i in [edge + 1, -(edge + 1), i64::MAX, i64::MIN] {
            let cell = natural_cell(&Value::Integer(i), &global).unwrap();
            assert_eq!(cell, CellValue::String(i.to_string()));
            assert_eq!(read(AppKind::Integer, cell).unwrap(), Value::Integer(i));
        }
    }

    #[test]
    fn test_non_finite_float_is_rejected() {
        assert!(natural_cell(&Value::Float(f64::NAN), &GlobalConfig::default()).is_err());
    }
}
