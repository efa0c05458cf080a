//! Job orchestration
//!
//! [`IndexingJob`] ties the pieces together: it plans with the
//! [`PartitionPlanner`](crate::planner::PartitionPlanner), persists a [`JobContext`]
//! through a [`JobStore`](crate::store::JobStore), and runs the partitions on up to
//! `threads` tokio tasks that feed an [`IndexSink`](crate::sink::IndexSink).

mod context;
mod runner;
mod worker;

pub use context::{JobContext, JobSettings};
pub use runner::{IndexingJob, JobReport, PartitionReport};
pub use worker::PartitionOutcome;
