//! Filter error types
//!
//! Defines all error conditions that can occur while parsing and compiling
//! entry filters.

use thiserror::Error;

/// Errors that can occur during filter operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// String filter expression could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Filter value does not match the property type
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// A StringRegex element is not a valid regular expression
    #[error("'{pattern}' is not a valid regular expression: {message}")]
    InvalidRegex { pattern: String, message: String },

    /// Comparison cannot be applied to the property type
    #[error("{comparison} comparison is not supported for type {property_type}")]
    UnsupportedComparison {
        comparison: String,
        property_type: String,
    },
}

/// Result type for filter operations
pub type QueryResult<T> = Result<T, QueryError>;
