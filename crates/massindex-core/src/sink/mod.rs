//! Index backends receiving the scanned entities

use async_trait::async_trait;
use massindex_common::types::Entity;

use crate::error::SinkError;
use crate::planner::PartitionSpec;

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonLinesSink;
pub use memory::MemorySink;

/// Destination of indexed entities.
///
/// `write` may receive an entity again after a restart; implementations must treat a
/// repeated identifier as an update.
#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Remove everything previously indexed for these entity types
    async fn purge(&self, _entity_types: &[String]) -> Result<(), SinkError> {
        Ok(())
    }

    /// Index one chunk of a partition, in identifier order
    async fn write(&self, partition: &PartitionSpec, entities: Vec<Entity>) -> Result<(), SinkError>;

    /// Compact the index once every partition completed
    async fn optimize(&self, _entity_types: &[String]) -> Result<(), SinkError> {
        Ok(())
    }
}
