//! Job progress aggregation
//!
//! Workers never touch the aggregate directly. Each one holds a [`ProgressHandle`] and
//! sends "partition N read K more items" deltas over a channel. A single task owns the
//! [`ProgressAggregator`], applies the deltas in arrival order and publishes a fresh
//! [`ProgressSnapshot`] on a watch channel after every merge, so readers never block
//! writers and the job total is exact.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::ProgressError;
use crate::planner::PartitionPlan;

/// Items read so far by one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionProgress {
    pub partition_index: usize,
    pub entity_type: String,
    pub items_read: u64,
    /// Planned row count of the partition's entity type
    pub total_for_entity: u64,
}

/// Items read so far for one entity type, across its partitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityProgress {
    pub entity_type: String,
    pub items_read: u64,
    pub total: u64,
}

impl EntityProgress {
    pub fn percentage(&self) -> f64 {
        percentage(self.items_read, self.total)
    }
}

/// Read-only view of job progress
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub per_partition: Vec<PartitionProgress>,
    pub job_total_read: u64,
    pub job_total_rows: u64,
}

impl ProgressSnapshot {
    pub fn percentage(&self) -> f64 {
        percentage(self.job_total_read, self.job_total_rows)
    }

    /// Per-entity totals, ordered by entity name
    pub fn entities(&self) -> Vec<EntityProgress> {
        let mut entities: BTreeMap<&str, EntityProgress> = BTreeMap::new();
        for partition in &self.per_partition {
            let entry = entities
                .entry(partition.entity_type.as_str())
                .or_insert_with(|| EntityProgress {
                    entity_type: partition.entity_type.clone(),
                    items_read: 0,
                    total: partition.total_for_entity,
                });
            entry.items_read += partition.items_read;
        }
        entities.into_values().collect()
    }

    /// One line per entity type, e.g. `Employee: 1200/4500 works processed (26.67%)`
    pub fn summary_lines(&self) -> Vec<String> {
        self.entities()
            .iter()
            .map(|e| {
                format!(
                    "{}: {}/{} works processed ({:.2}%)",
                    e.entity_type,
                    e.items_read,
                    e.total,
                    e.percentage()
                )
            })
            .collect()
    }

    pub fn log(&self) {
        for line in self.summary_lines() {
            info!("{line}");
        }
        info!(
            read = self.job_total_read,
            total = self.job_total_rows,
            "Job progress {:.2}%",
            self.percentage()
        );
    }
}

fn percentage(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    done as f64 * 100.0 / total as f64
}

/// Owner of the job-level aggregate
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    snapshot: ProgressSnapshot,
}

impl ProgressAggregator {
    /// Zeroed progress for every partition of `plan`
    pub fn new(plan: &PartitionPlan) -> Self {
        let per_partition = plan
            .partitions
            .iter()
            .map(|p| PartitionProgress {
                partition_index: p.index,
                entity_type: p.entity_type.clone(),
                items_read: 0,
                total_for_entity: plan.entity_type(&p.entity_type).map(|e| e.row_count).unwrap_or(0),
            })
            .collect();

        Self {
            snapshot: ProgressSnapshot {
                per_partition,
                job_total_read: 0,
                job_total_rows: plan.total_rows,
            },
        }
    }

    /// Start from persisted per-partition counts (job resume)
    pub fn seeded(plan: &PartitionPlan, items_read: &BTreeMap<usize, u64>) -> Result<Self, ProgressError> {
        let mut aggregator = Self::new(plan);
        for (&index, &count) in items_read {
            aggregator.merge(index, count)?;
        }
        Ok(aggregator)
    }

    /// Add `delta` items to a partition and to the job total
    pub fn merge(&mut self, partition_index: usize, delta: u64) -> Result<(), ProgressError> {
        let partition = self
            .snapshot
            .per_partition
            .get_mut(partition_index)
            .filter(|p| p.partition_index == partition_index)
            .ok_or(ProgressError::UnknownPartition(partition_index))?;
        partition.items_read += delta;
        self.snapshot.job_total_read += delta;
        Ok(())
    }

    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.snapshot
    }

    /// Move the aggregator into its own task.
    ///
    /// The task ends once every [`ProgressHandle`] is dropped and returns the final
    /// snapshot.
    pub fn spawn(self) -> (ProgressHandle, JoinHandle<ProgressSnapshot>) {
        let (snapshot_tx, _) = watch::channel(self.snapshot.clone());
        self.spawn_with(snapshot_tx)
    }

    /// Like [`ProgressAggregator::spawn`], publishing snapshots on an existing channel
    pub fn spawn_with(self, snapshots: watch::Sender<ProgressSnapshot>) -> (ProgressHandle, JoinHandle<ProgressSnapshot>) {
        let (delta_tx, mut delta_rx) = mpsc::unbounded_channel::<ProgressDelta>();
        snapshots.send_replace(self.snapshot.clone());
        let snapshot_rx = snapshots.subscribe();

        let task = tokio::spawn(async move {
            let mut aggregator = self;
            while let Some(delta) = delta_rx.recv().await {
                if let Err(e) = aggregator.merge(delta.partition_index, delta.items) {
                    warn!(error = %e, items = delta.items, "Dropping progress update");
                    continue;
                }
                snapshots.send_replace(aggregator.snapshot.clone());
            }
            aggregator.snapshot
        });

        (
            ProgressHandle {
                deltas: delta_tx,
                snapshots: snapshot_rx,
            },
            task,
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct ProgressDelta {
    partition_index: usize,
    items: u64,
}

/// Cloneable sender side of the aggregation task
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    deltas: mpsc::UnboundedSender<ProgressDelta>,
    snapshots: watch::Receiver<ProgressSnapshot>,
}

impl ProgressHandle {
    /// Report `items` more items read by `partition_index`. Returns false once the
    /// aggregation task has stopped.
    pub fn report(&self, partition_index: usize, items: u64) -> bool {
        if items == 0 {
            return true;
        }
        self.deltas
            .send(ProgressDelta { partition_index, items })
            .is_ok()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified after every merge
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.snapshots.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn snapshot(parts: &[(&str, u64, u64)]) -> ProgressSnapshot {
        let per_partition: Vec<PartitionProgress> = parts
            .iter()
            .enumerate()
            .map(|(i, (entity, read, total))| PartitionProgress {
                partition_index: i,
                entity_type: entity.to_string(),
                items_read: *read,
                total_for_entity: *total,
            })
            .collect();
        ProgressSnapshot {
            job_total_read: per_partition.iter().map(|p| p.items_read).sum(),
            job_total_rows: 4505,
            per_partition,
        }
    }

    #[test]
    fn test_summary_lines() {
        let snapshot = snapshot(&[("Company", 5, 5), ("Employee", 700, 4500), ("Employee", 500, 4500)]);
        assert_eq!(
            snapshot.summary_lines(),
            vec![
                "Company: 5/5 works processed (100.00%)".to_string(),
                "Employee: 1200/4500 works processed (26.67%)".to_string(),
            ]
        );
    }

    #[test]
    fn test_empty_total_counts_as_done() {
        assert_eq!(percentage(0, 0), 100.0);
        assert_eq!(percentage(1, 4), 25.0);
    }
}
