//! massindex Core Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Partitioned, checkpointed and resumable mass indexing of relational entity types.
//!
//! # Overview
//!
//! - **Planning**: [`PartitionPlanner`] splits entity types into identifier ranges
//! - **Scanning**: [`ScanCursor`] reads one partition in identifier order and can resume
//!   from a [`Checkpoint`](massindex_common::types::Checkpoint)
//! - **Checkpointing**: [`CheckpointPolicy`] decides when a position is persisted
//! - **Progress**: [`ProgressAggregator`] sums per-partition progress into a job total
//! - **Orchestration**: [`IndexingJob`] runs partitions concurrently against an
//!   [`EntityCatalog`], a [`JobStore`] and an [`IndexSink`]
//!
//! # Example
//!
//! ```no_run
//! use massindex_core::catalog::InMemoryCatalog;
//! use massindex_core::sink::MemorySink;
//! use massindex_core::store::MemoryJobStore;
//! use massindex_core::{IndexingJob, JobConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let catalog = InMemoryCatalog::new().with_sequential_rows("Employee", 4500);
//! let job = IndexingJob::new(
//!     Arc::new(catalog),
//!     Arc::new(MemoryJobStore::new()),
//!     Arc::new(MemorySink::new()),
//! );
//!
//! let mut config = JobConfig::new(["Employee"]);
//! config.partitions = 2;
//! config.threads = 2;
//! let report = job.start(&config).await?;
//! assert!(report.is_completed());
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod cursor;
pub mod error;
pub mod job;
pub mod planner;
pub mod progress;
pub mod sink;
pub mod store;

// Re-export commonly used types
pub use catalog::{EntityCatalog, OrderedScan, ScanRequest};
pub use checkpoint::{CheckpointPolicy, StepMetrics};
pub use config::{DatabaseConfig, JobConfig};
pub use cursor::{ScanCursor, ScanOptions};
pub use error::{
    CatalogError, CheckpointConfigError, JobError, JobResult, PlanningError, ResourceReleaseError, ScanError,
};
pub use job::{IndexingJob, JobContext, JobReport};
pub use planner::{PartitionPlan, PartitionPlanner, PartitionSpec, PartitionStrategy};
pub use progress::{ProgressAggregator, ProgressHandle, ProgressSnapshot};
pub use sink::IndexSink;
pub use store::JobStore;
