//! massindex Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared data model, error types and logging setup for the massindex workspace.
//!
//! # Overview
//!
//! - **Types**: identifiers, partition boundaries, checkpoints, plan records and
//!   filter predicates exchanged between the planner, the scan cursors and the job store
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias
//! - **Logging**: `tracing` subscriber configuration shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use massindex_common::types::{EntityId, PartitionBoundary};
//!
//! fn main() -> massindex_common::Result<()> {
//!     let boundary = PartitionBoundary::new(Some(EntityId::Int(1000)), Some(EntityId::Int(2000)))?;
//!     assert!(boundary.contains(&EntityId::Int(1500)));
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
