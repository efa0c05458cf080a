//! Error types for the massindex CLI
//!
//! Messages are user-facing and say what to do next where there is something to do.

use massindex_core::store::JobStatus;
use massindex_core::JobError;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// Error type for CLI operations
#[derive(Error, Debug)]
pub enum CliError {
    /// Indexing job failed as a whole
    #[error("Job error: {0}")]
    Job(#[from] JobError),

    /// The job ended without indexing every partition
    #[error("Job {job_id} ended {status}. Run 'massindex resume {job_id}' to continue from its checkpoints.")]
    Incomplete { job_id: Uuid, status: JobStatus },

    /// Filter argument could not be parsed
    #[error("Invalid filter: {0}. Expected '[Entity:]field op value', e.g. 'Employee:salary >= 1000'.")]
    InvalidFilter(String),

    /// Database operation failed (SQLx)
    #[error("Database error: {0}. Check your database connection settings.")]
    Database(#[from] sqlx::Error),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check your arguments and environment variables.")]
    Config(String),

    /// JSON output failed
    #[error("Failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic anyhow error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Incomplete { .. } => 3,
            CliError::InvalidFilter(_) | CliError::Config(_) => 2,
            _ => 1,
        }
    }
}
