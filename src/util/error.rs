//! Error types for attribute and metadata operations.

use thiserror::Error;

/// Main error type for attribute, domain and accessor operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Selector text could not be parsed or resolved
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    /// Attribute name is empty, reserved or contains forbidden characters
    #[error("Invalid attribute name: '{0}'")]
    InvalidName(String),

    /// Attribute not found by name
    #[error("Attribute not found: {0}")]
    AttributeNotFound(String),

    /// Attribute already exists with another type
    #[error("Attribute '{name}' already exists as {existing}, cannot create it as {requested}")]
    DuplicateName {
        name: String,
        existing: String,
        requested: String,
    },

    /// Value types do not match
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Source and target row counts differ
    #[error("Entry count mismatch: expected {expected}, got {actual}")]
    EntryCountMismatch { expected: usize, actual: usize },

    /// No field extractor for this name on this type
    #[error("Unsupported extra name '{name}' on {value_type}")]
    UnsupportedExtraName { name: String, value_type: String },

    /// Operation not supported for these inputs
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Domain name or id not known to the container
    #[error("Domain not found: {0}")]
    DomainNotFound(String),

    /// Entry key outside of the domain
    #[error("Invalid entry key: {0}")]
    InvalidEntryKey(i64),

    /// Accessor or keys do not allow writing
    #[error("Accessor is read-only")]
    ReadOnly,

    /// Serialized data is truncated or inconsistent
    #[error("Invalid data structure: {0}")]
    InvalidStructure(String),

    /// Serialized data was written by an unknown format version
    #[error("Unsupported serialization version: {0}")]
    UnsupportedVersion(u32),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 conversion error
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Settings file could not be parsed
    #[error("Invalid settings: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid structure error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidStructure(msg.into())
    }

    /// Create a selector error.
    pub fn selector(msg: impl Into<String>) -> Self {
        Self::InvalidSelector(msg.into())
    }

    /// Create a type mismatch error from two displayable types.
    pub fn type_mismatch(expected: impl ToString, actual: impl ToString) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Result type alias for attribute operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::DuplicateName {
            name: "Score".into(),
            existing: "int32".into(),
            requested: "double".into(),
        };
        let text = e.to_string();
        assert!(text.contains("Score"));
        assert!(text.contains("int32"));
        assert!(text.contains("double"));

        let e = Error::EntryCountMismatch { expected: 5, actual: 3 };
        assert!(e.to_string().contains('5'));
        assert!(e.to_string().contains('3'));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
