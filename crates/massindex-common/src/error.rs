//! Error types shared across massindex crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by the shared data model
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid partition boundary: lower bound {lower} is not below upper bound {upper}")]
    InvalidBoundary { lower: String, upper: String },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid filter predicate '{input}': {reason}")]
    InvalidPredicate { input: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}
