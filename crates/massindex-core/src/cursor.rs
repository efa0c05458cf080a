//! Per-partition scan cursor
//!
//! A cursor reads the entities of one partition in ascending identifier order and
//! remembers the last identifier it returned, which is what gets checkpointed.
//!
//! On restart the cursor reopens at the checkpointed identifier *inclusive*: the row
//! read last before the interruption is read again. Delivery is at-least-once with at
//! most one duplicate per restart.

use massindex_common::types::{Checkpoint, Entity, EntityId, FilterPredicate, IdentifierField};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::catalog::{EntityCatalog, OrderedScan, ScanProjection, ScanRequest};
use crate::config::DEFAULT_FETCH_SIZE;
use crate::error::ScanError;
use crate::planner::PartitionSpec;

/// Query options applied to every partition scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    pub fetch_size: usize,
    pub max_results: Option<u64>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            fetch_size: DEFAULT_FETCH_SIZE,
            max_results: None,
        }
    }
}

pub struct ScanCursor {
    catalog: Arc<dyn EntityCatalog>,
    partition: PartitionSpec,
    identifier: IdentifierField,
    filters: Vec<FilterPredicate>,
    options: ScanOptions,
    scan: Option<Box<dyn OrderedScan>>,
    last_seen: Option<EntityId>,
    restarted: bool,
}

impl ScanCursor {
    pub fn new(
        catalog: Arc<dyn EntityCatalog>,
        partition: PartitionSpec,
        identifier: IdentifierField,
        filters: Vec<FilterPredicate>,
        options: ScanOptions,
    ) -> Self {
        Self {
            catalog,
            partition,
            identifier,
            filters,
            options,
            scan: None,
            last_seen: None,
            restarted: false,
        }
    }

    pub fn partition(&self) -> &PartitionSpec {
        &self.partition
    }

    pub fn is_open(&self) -> bool {
        self.scan.is_some()
    }

    /// Whether the last `open` resumed from a checkpoint
    pub fn is_restarted(&self) -> bool {
        self.restarted
    }

    /// Open the partition scan, from `checkpoint` when resuming
    pub async fn open(&mut self, checkpoint: Option<&Checkpoint>) -> Result<(), ScanError> {
        let index = self.partition.index;
        if self.scan.is_some() {
            return Err(ScanError::AlreadyOpen(index));
        }
        if let Some(checkpoint) = checkpoint {
            if checkpoint.partition_index != index {
                return Err(ScanError::CheckpointMismatch {
                    expected: index,
                    found: checkpoint.partition_index,
                });
            }
        }

        let lower = self.partition.boundary.effective_lower(checkpoint).cloned();
        let request = ScanRequest::identifiers(&self.partition.entity_type, self.identifier.clone())
            .with_bounds(lower.clone(), self.partition.boundary.upper_bound.clone())
            .with_filters(self.filters.clone())
            .with_projection(ScanProjection::Entities)
            .with_fetch_size(self.options.fetch_size)
            .with_max_results(self.options.max_results);

        let scan = self
            .catalog
            .open_scan(request)
            .await
            .map_err(|source| ScanError::Open {
                partition_index: index,
                source,
            })?;

        self.scan = Some(scan);
        self.last_seen = None;
        self.restarted = checkpoint.is_some();

        debug!(
            partition_index = index,
            entity_type = %self.partition.entity_type,
            lower = ?lower,
            upper = ?self.partition.boundary.upper_bound,
            restarted = self.restarted,
            "Scan cursor opened"
        );
        Ok(())
    }

    /// Next entity of the partition, `None` at the end
    pub async fn read(&mut self) -> Result<Option<Entity>, ScanError> {
        let index = self.partition.index;
        let scan = self.scan.as_mut().ok_or(ScanError::NotOpen(index))?;

        let row = scan.next().await.map_err(|source| ScanError::Read {
            partition_index: index,
            source,
        })?;

        Ok(row.map(|row| {
            self.last_seen = Some(row.id.clone());
            Entity {
                entity_type: self.partition.entity_type.clone(),
                id: row.id,
                document: row.document,
            }
        }))
    }

    /// Position to resume from, once at least one entity was read
    pub fn checkpoint_value(&self) -> Option<Checkpoint> {
        self.last_seen
            .as_ref()
            .map(|id| Checkpoint::new(self.partition.index, id.clone()))
    }

    /// Release the scan. Release failures are logged; closing twice does nothing.
    pub async fn close(&mut self) {
        let Some(mut scan) = self.scan.take() else {
            return;
        };
        for failure in scan.close().await {
            warn!(
                partition_index = self.partition.index,
                entity_type = %self.partition.entity_type,
                resource = failure.resource,
                error = %failure.source,
                "Failed to release scan resource"
            );
        }
        debug!(partition_index = self.partition.index, "Scan cursor closed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::memory::{InMemoryCatalog, CURSOR_RESOURCE};
    use massindex_common::types::PartitionBoundary;

    fn cursor(catalog: &InMemoryCatalog, index: usize, lower: Option<i64>, upper: Option<i64>) -> ScanCursor {
        let partition = PartitionSpec {
            index,
            entity_type: "Employee".to_string(),
            boundary: PartitionBoundary::new(lower.map(EntityId::Int), upper.map(EntityId::Int)).unwrap(),
        };
        ScanCursor::new(
            Arc::new(catalog.clone()),
            partition,
            IdentifierField::integer("id"),
            Vec::new(),
            ScanOptions::default(),
        )
    }

    async fn drain(cursor: &mut ScanCursor) -> Vec<i64> {
        let mut ids = Vec::new();
        while let Some(entity) = cursor.read().await.unwrap() {
            ids.push(entity.id.as_int().unwrap());
        }
        ids
    }

    #[tokio::test]
    async fn test_reads_partition_in_order() {
        let catalog = InMemoryCatalog::new().with_sequential_rows("Employee", 20);
        let mut cursor = cursor(&catalog, 1, Some(5), Some(10));

        cursor.open(None).await.unwrap();
        assert!(cursor.checkpoint_value().is_none());
        assert_eq!(drain(&mut cursor).await, vec![5, 6, 7, 8, 9]);
        assert_eq!(cursor.checkpoint_value(), Some(Checkpoint::new(1, EntityId::Int(9))));
        assert!(!cursor.is_restarted());
        cursor.close().await;
        assert_eq!(catalog.open_resources(), 0);
    }

    #[tokio::test]
    async fn test_restart_rereads_checkpointed_row() {
        let catalog = InMemoryCatalog::new().with_sequential_rows("Employee", 10);
        let mut cursor = cursor(&catalog, 0, None, None);

        cursor.open(Some(&Checkpoint::new(0, EntityId::Int(4)))).await.unwrap();
        assert!(cursor.is_restarted());
        assert_eq!(drain(&mut cursor).await, vec![4, 5, 6, 7, 8, 9, 10]);
        cursor.close().await;
    }

    #[tokio::test]
    async fn test_open_rejects_foreign_checkpoint() {
        let catalog = InMemoryCatalog::new().with_sequential_rows("Employee", 10);
        let mut cursor = cursor(&catalog, 2, None, None);

        let err = cursor.open(Some(&Checkpoint::new(3, EntityId::Int(4)))).await.unwrap_err();
        assert!(matches!(err, ScanError::CheckpointMismatch { expected: 2, found: 3 }));
        assert!(!cursor.is_open());
    }

    #[tokio::test]
    async fn test_read_before_open_fails() {
        let catalog = InMemoryCatalog::new().with_sequential_rows("Employee", 10);
        let mut cursor = cursor(&catalog, 0, None, None);
        assert!(matches!(cursor.read().await, Err(ScanError::NotOpen(0))));
    }

    #[tokio::test]
    async fn test_close_survives_release_failure() {
        let catalog = InMemoryCatalog::new().with_sequential_rows("Employee", 10);
        catalog.fail_release_of(CURSOR_RESOURCE);
        let mut cursor = cursor(&catalog, 0, None, None);

        cursor.open(None).await.unwrap();
        cursor.read().await.unwrap();
        cursor.close().await;
        cursor.close().await;

        assert!(!cursor.is_open());
        assert_eq!(catalog.open_resources(), 0);
    }

    #[tokio::test]
    async fn test_max_results_caps_one_opening() {
        let catalog = InMemoryCatalog::new().with_sequential_rows("Employee", 10);
        let mut cursor = cursor(&catalog, 0, None, None);
        cursor.options.max_results = Some(3);

        cursor.open(None).await.unwrap();
        assert_eq!(drain(&mut cursor).await, vec![1, 2, 3]);
        cursor.close().await;
    }
}
