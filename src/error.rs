//! Error types for excelmap

use thiserror::Error;

/// Result type alias for excelmap operations
pub type Result<T> = std::result::Result<T, ExcelError>;

/// Main error type for all read/write sessions
#[derive(Error, Debug)]
pub enum ExcelError {
    /// Invalid registration or mapping, raised while a session is being built
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No converter can be resolved for a type/kind pair
    #[error("No converter for application type {app} and cell kind {cell}")]
    UnsupportedType { app: String, cell: String },

    /// A converter failed for one specific cell
    #[error("Failed to convert sheet '{sheet}' row {row} column {column} (field '{field}', expected {expected}): {source}")]
    Conversion {
        sheet: String,
        row: u32,
        column: String,
        field: String,
        expected: String,
        #[source]
        source: Box<ExcelError>,
    },

    /// Value rejected by a converter; engines wrap this into `Conversion`
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// The archive or markup is structurally invalid
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    /// Operation attempted after `finish()`
    #[error("Session is closed: cannot {0}")]
    SessionClosed(&'static str),

    /// Invalid sheet name or sheet not found
    #[error("Sheet '{sheet}' not found. Available sheets: {available}")]
    SheetNotFound { sheet: String, available: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP layer error
    #[error("Archive error: {0}")]
    Archive(String),
}

impl ExcelError {
    /// Errors after which a session cannot make further progress
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExcelError::MalformedDocument(_) | ExcelError::Io(_) | ExcelError::Archive(_)
        )
    }

    /// Errors the read engine's error policy may recover from
    pub fn is_conversion(&self) -> bool {
        matches!(self, ExcelError::Conversion { .. })
    }
}

impl From<s_zip::SZipError> for ExcelError {
    fn from(err: s_zip::SZipError) -> Self {
        ExcelError::Archive(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_error_message_has_coordinates() {
        let err = ExcelError::Conversion {
            sheet: "Sheet1".to_string(),
            row: 3,
            column: "B".to_string(),
            field: "age".to_string(),
            expected: "Integer".to_string(),
            source: Box::new(ExcelError::InvalidValue("'abc' is not a number".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("Sheet1"));
        assert!(msg.contains("row 3"));
        assert!(msg.contains("column B"));
        assert!(msg.contains("'age'"));
        assert!(err.is_conversion());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(ExcelError::MalformedDocument("bad".into()).is_fatal());
        assert!(!ExcelError::SessionClosed("read").is_fatal());
    }
}
