use async_trait::async_trait;
use massindex_common::types::{Entity, EntityId};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::IndexSink;
use crate::error::SinkError;
use crate::planner::PartitionSpec;

#[derive(Debug, Default)]
struct Collected {
    /// partition index -> entities in write order
    partitions: BTreeMap<usize, Vec<Entity>>,
    purged: Vec<String>,
    optimized: Vec<String>,
    failing_partitions: HashSet<usize>,
}

/// Sink that keeps every written entity, for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Collected>>,
    writes: Arc<AtomicUsize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes for this partition fail until cleared
    pub fn fail_partition(&self, partition_index: usize) {
        self.lock().failing_partitions.insert(partition_index);
    }

    pub fn clear_failures(&self) {
        self.lock().failing_partitions.clear();
    }

    /// Entities written for one partition, duplicates included
    pub fn partition(&self, partition_index: usize) -> Vec<Entity> {
        self.lock().partitions.get(&partition_index).cloned().unwrap_or_default()
    }

    /// Every entity written, in partition order, duplicates included
    pub fn entities(&self) -> Vec<Entity> {
        self.lock().partitions.values().flatten().cloned().collect()
    }

    /// Identifiers written for one entity type, duplicates included
    pub fn ids(&self, entity_type: &str) -> Vec<EntityId> {
        self.entities()
            .into_iter()
            .filter(|e| e.entity_type == entity_type)
            .map(|e| e.id)
            .collect()
    }

    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn purged(&self) -> Vec<String> {
        self.lock().purged.clone()
    }

    pub fn optimized(&self) -> Vec<String> {
        self.lock().optimized.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Collected> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl IndexSink for MemorySink {
    async fn purge(&self, entity_types: &[String]) -> Result<(), SinkError> {
        let mut inner = self.lock();
        inner.partitions.clear();
        inner.purged.extend(entity_types.iter().cloned());
        Ok(())
    }

    async fn write(&self, partition: &PartitionSpec, entities: Vec<Entity>) -> Result<(), SinkError> {
        let mut inner = self.lock();
        if inner.failing_partitions.contains(&partition.index) {
            return Err(SinkError::Backend(format!("injected write failure for partition {}", partition.index)));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        inner.partitions.entry(partition.index).or_default().extend(entities);
        Ok(())
    }

    async fn optimize(&self, entity_types: &[String]) -> Result<(), SinkError> {
        self.lock().optimized.extend(entity_types.iter().cloned());
        Ok(())
    }
}
