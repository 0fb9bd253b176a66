use thiserror::Error;

use crate::column::ColumnType;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Column already exists: {0}")]
    ColumnExists(String),

    #[error("Invalid column length: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Invalid column type: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        expected: ColumnType,
        actual: ColumnType,
    },

    #[error("Unknown or read-only column: {0}")]
    NotWritable(String),

    #[error("Column must be categorical: {0}")]
    NotCategorical(String),

    #[error("Unknown field name: {0}")]
    UnknownField(String),

    #[error("Unknown row label: {0}")]
    UnknownRowLabel(i32),

    #[error("Duplicate row label: {0}")]
    DuplicateRowLabel(i32),

    #[error("Row offset out of bounds: {0}")]
    OffsetOutOfBounds(usize),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Layout not found: {0}")]
    LayoutNotFound(String),

    #[error("Layout already exists: {0}")]
    LayoutExists(String),

    #[error("Empty result for query: {0}")]
    EmptyResult(String),

    #[error("Invalid query structure: {0}")]
    InvalidQuery(String),

    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Selection too large")]
    SelectionTooLarge,

    #[error("Not implemented by server: {0}")]
    NotImplemented(String),

    #[error("Request aborted")]
    Aborted,

    #[error("Request timed out")]
    Timeout,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Job channel closed: {0}")]
    ChannelClosed(String),

    #[error("Job failed ({family}): {message}")]
    JobFailed { family: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify a non-2xx response status the way it is reported to the user.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            403 => Error::SelectionTooLarge,
            501 => Error::NotImplemented(message.into()),
            _ => Error::Http {
                status,
                message: message.into(),
            },
        }
    }

    /// Transport aborts are reported distinctly from other network failures.
    #[inline]
    #[must_use]
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted | Error::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            Error::from_status(403, ""),
            Error::SelectionTooLarge
        ));
        assert!(matches!(
            Error::from_status(501, "diffexp"),
            Error::NotImplemented(_)
        ));
        assert!(matches!(
            Error::from_status(500, "boom"),
            Error::Http { status: 500, .. }
        ));
    }
}
