//! Error taxonomy of the indexing engine
//!
//! | Error                    | Raised by                 | Effect                           |
//! |--------------------------|---------------------------|----------------------------------|
//! | [`PlanningError`]        | planner                   | job aborts before any partition  |
//! | [`ScanError`]            | scan cursor               | partition marked failed          |
//! | [`ResourceReleaseError`] | cursor / planner close    | logged, never escalated          |
//! | [`CheckpointConfigError`]| checkpoint policy         | job aborts                       |
//!
//! [`CatalogError`], [`StoreError`] and [`SinkError`] come from the collaborators and are
//! wrapped by the above or by [`JobError`].

use thiserror::Error;
use uuid::Uuid;

/// Failure inside an [`crate::catalog::EntityCatalog`] implementation
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("Entity type {entity_type} has no usable identifier: {reason}")]
    NoIdentifier { entity_type: String, reason: String },

    #[error("Unsupported filter predicate for this catalog: {0}")]
    UnsupportedPredicate(String),

    #[error("Identifier kind mismatch for {entity_type}: {reason}")]
    IdentifierMismatch { entity_type: String, reason: String },

    #[error("Scan already closed")]
    ScanClosed,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Catalog backend error: {0}")]
    Backend(String),
}

/// Planning failed; no partition plan is published
#[derive(Error, Debug)]
pub enum PlanningError {
    #[error("No entity types to plan")]
    NoEntityTypes,

    #[error("Invalid planning parameters: {0}")]
    InvalidParameters(String),

    #[error("Cannot resolve identifier field of {entity_type}: {source}")]
    IdentifierUnresolved {
        entity_type: String,
        #[source]
        source: CatalogError,
    },

    #[error("Row count query failed for {entity_type}: {source}")]
    RowCount {
        entity_type: String,
        #[source]
        source: CatalogError,
    },

    #[error("Boundary scan failed for {entity_type}: {source}")]
    BoundaryScan {
        entity_type: String,
        #[source]
        source: CatalogError,
    },

    #[error("Invalid partition cover for {entity_type}: {reason}")]
    InvalidCover { entity_type: String, reason: String },
}

/// Scan failure isolated to one partition
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Failed to open scan of partition {partition_index}: {source}")]
    Open {
        partition_index: usize,
        #[source]
        source: CatalogError,
    },

    #[error("Failed to read partition {partition_index}: {source}")]
    Read {
        partition_index: usize,
        #[source]
        source: CatalogError,
    },

    #[error("Cursor of partition {0} is not open")]
    NotOpen(usize),

    #[error("Cursor of partition {0} is already open")]
    AlreadyOpen(usize),

    #[error("Checkpoint of partition {found} cannot resume partition {expected}")]
    CheckpointMismatch { expected: usize, found: usize },
}

/// Releasing one resource of a scan failed. Always logged, never propagated.
#[derive(Error, Debug)]
#[error("Failed to release {resource}: {source}")]
pub struct ResourceReleaseError {
    pub resource: &'static str,
    #[source]
    pub source: CatalogError,
}

impl ResourceReleaseError {
    pub fn new(resource: &'static str, source: CatalogError) -> Self {
        Self { resource, source }
    }
}

/// Checkpointing is misconfigured
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CheckpointConfigError {
    #[error("Metric READ_COUNT not found")]
    MissingReadCount,

    #[error("Checkpoint item count must be greater than 0")]
    ZeroItemCount,
}

/// Progress update rejected by the aggregator
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProgressError {
    #[error("Unknown partition index: {0}")]
    UnknownPartition(usize),
}

/// Failure of a [`crate::store::JobStore`]
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Partition {partition_index} not found in job {job_id}")]
    PartitionNotFound { job_id: Uuid, partition_index: usize },

    #[error("Job already exists: {0}")]
    JobExists(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt job state: {0}")]
    Corrupt(String),
}

/// Failure of a [`crate::sink::IndexSink`]
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Index backend error: {0}")]
    Backend(String),
}

/// Job-level failure returned by [`crate::job::IndexingJob`]
#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    CheckpointConfig(#[from] CheckpointConfigError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Index sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Invalid job configuration: {0}")]
    Config(String),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

pub type JobResult<T> = std::result::Result<T, JobError>;
