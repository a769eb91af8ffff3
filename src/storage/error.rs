//! Storage error types
//!
//! Defines all errors that can occur in the database storage layer.

use crate::query::QueryError;
use thiserror::Error;

/// Errors that can occur in the database storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON or CSV serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Index, view or snapshot document could not be written or parsed
    #[error("XML error: {0}")]
    Xml(String),

    /// A database with this name is already registered
    #[error("The database with the name '{0}' already exists")]
    DatabaseExists(String),

    /// Requested database does not exist
    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    /// A view with this name is already registered
    #[error("The view with the name '{0}' already exists")]
    ViewExists(String),

    /// Requested view does not exist
    #[error("View not found: {0}")]
    ViewNotFound(String),

    /// Requested snapshot does not exist
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// A snapshot with this name is already registered
    #[error("The snapshot with the name '{0}' already exists")]
    SnapshotExists(String),

    /// Another update holds the database lock
    #[error("There is currently another update in progress for database {0}")]
    Locked(String),

    /// Statistics reference a snapshot version whose file is gone
    #[error("Missing index file for database version {version}")]
    MissingSnapshot { version: u32 },

    /// The view's backing database no longer exists
    #[error("Invalid view: {0}")]
    InvalidView(String),

    /// One or more databases referenced by a snapshot no longer exist
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Caller supplied an unusable name, id or path
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Entry filter failed validation
    #[error("Filter error: {0}")]
    Filter(#[from] QueryError),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for StorageError {
    fn from(err: csv::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<quick_xml::Error> for StorageError {
    fn from(err: quick_xml::Error) -> Self {
        StorageError::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for StorageError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        StorageError::Xml(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::MissingSnapshot { version: 3 };
        assert_eq!(err.to_string(), "Missing index file for database version 3");

        let err = StorageError::DatabaseExists("pdb".to_string());
        assert_eq!(
            err.to_string(),
            "The database with the name 'pdb' already exists"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
    }

    #[test]
    fn test_filter_error_conversion() {
        let err: StorageError = QueryError::InvalidValue("abc".to_string()).into();
        assert!(matches!(err, StorageError::Filter(_)));
    }
}
