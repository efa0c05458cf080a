//! Partition worker
//!
//! Workers pull partition indices from a shared queue until it is empty or the job is
//! cancelled. For each partition:
//!
//! 1. mark it `running` and open a cursor (from its checkpoint, if any)
//! 2. read entities into a chunk; after each read ask the checkpoint policy
//! 3. on checkpoint: write the chunk to the sink, persist the cursor position, report
//!    progress
//! 4. at the end: flush the last chunk and mark it `completed`
//!
//! A scan or sink failure fails only that partition. Store failures and checkpoint
//! misconfiguration are fatal for the whole job.

use massindex_common::types::{Checkpoint, Entity, EntityId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::EntityCatalog;
use crate::checkpoint::{CheckpointPolicy, MetricKind, StepMetrics};
use crate::cursor::ScanCursor;
use crate::error::{JobError, JobResult, ScanError, SinkError, StoreError};
use crate::job::JobContext;
use crate::planner::PartitionSpec;
use crate::progress::ProgressHandle;
use crate::sink::IndexSink;
use crate::store::{JobStore, PartitionStatus};

/// Partition indices handed out in plan order
#[derive(Debug)]
pub(crate) struct WorkQueue {
    indices: Vec<usize>,
    next: AtomicUsize,
}

impl WorkQueue {
    pub(crate) fn new(indices: Vec<usize>) -> Self {
        Self {
            indices,
            next: AtomicUsize::new(0),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.indices.len()
    }

    pub(crate) fn next(&self) -> Option<usize> {
        let position = self.next.fetch_add(1, Ordering::SeqCst);
        self.indices.get(position).copied()
    }
}

/// How one partition ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionOutcome {
    Completed { items_read: u64 },
    Failed { error: String },
    Stopped,
}

enum ScanEnd {
    Exhausted,
    Cancelled,
}

/// Error while scanning one partition
enum PartitionFailure {
    Scan(ScanError),
    Sink(SinkError),
    Fatal(JobError),
}

impl From<StoreError> for PartitionFailure {
    fn from(e: StoreError) -> Self {
        PartitionFailure::Fatal(e.into())
    }
}

/// Everything a worker task shares with its siblings
pub(crate) struct Worker {
    pub(crate) job: Arc<JobContext>,
    pub(crate) catalog: Arc<dyn EntityCatalog>,
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) sink: Arc<dyn IndexSink>,
    pub(crate) policy: CheckpointPolicy,
    pub(crate) progress: ProgressHandle,
    pub(crate) cancel: CancellationToken,
}

/// Per-opening scan state
struct PartitionRun {
    items_read: u64,
    unreported: u64,
    chunk: Vec<Entity>,
    metrics: StepMetrics,
}

impl Worker {
    /// Process partitions until the queue is drained or the job is cancelled.
    ///
    /// Returns the outcomes of the partitions this worker ran.
    pub(crate) async fn run(
        self: Arc<Self>,
        worker_id: usize,
        queue: Arc<WorkQueue>,
    ) -> JobResult<Vec<(usize, PartitionOutcome)>> {
        let mut outcomes = Vec::new();
        while !self.cancel.is_cancelled() {
            let Some(index) = queue.next() else {
                break;
            };
            debug!(worker_id, partition_index = index, "Worker picked partition");
            let outcome = self.run_partition(index).await?;
            outcomes.push((index, outcome));
        }
        debug!(worker_id, partitions = outcomes.len(), "Worker finished");
        Ok(outcomes)
    }

    async fn run_partition(&self, index: usize) -> JobResult<PartitionOutcome> {
        let job_id = self.job.job_id;
        let spec = self
            .job
            .plan
            .get(index)
            .cloned()
            .ok_or(StoreError::PartitionNotFound {
                job_id,
                partition_index: index,
            })?;
        let descriptor = self
            .job
            .entity_type(&spec.entity_type)
            .ok_or_else(|| StoreError::Corrupt(format!("entity type {} missing from job context", spec.entity_type)))?;

        let state = self.store.partition_state(job_id, index).await?;
        self.store
            .set_partition_status(job_id, index, PartitionStatus::Running, None)
            .await?;

        let mut cursor = ScanCursor::new(
            self.catalog.clone(),
            spec.clone(),
            descriptor.identifier.clone(),
            self.job.filters_for(&spec.entity_type),
            self.job.settings.scan_options(),
        );

        info!(
            partition_index = index,
            entity_type = %spec.entity_type,
            boundary = %spec.boundary,
            resumed_from = ?state.checkpoint.as_ref().map(|c| &c.last_seen_identifier),
            "Partition started"
        );

        let result = self
            .scan_partition(&spec, &mut cursor, state.checkpoint.as_ref(), state.items_read)
            .await;
        cursor.close().await;

        match result {
            Ok((ScanEnd::Exhausted, items_read)) => {
                self.store
                    .set_partition_status(job_id, index, PartitionStatus::Completed, None)
                    .await?;
                info!(partition_index = index, items_read, "Partition completed");
                Ok(PartitionOutcome::Completed { items_read })
            }
            Ok((ScanEnd::Cancelled, items_read)) => {
                self.store
                    .set_partition_status(job_id, index, PartitionStatus::Stopped, None)
                    .await?;
                info!(partition_index = index, items_read, "Partition stopped");
                Ok(PartitionOutcome::Stopped)
            }
            Err(PartitionFailure::Scan(e)) => self.fail_partition(index, e.to_string()).await,
            Err(PartitionFailure::Sink(e)) => self.fail_partition(index, e.to_string()).await,
            Err(PartitionFailure::Fatal(e)) => {
                let message = e.to_string();
                if let Err(store_err) = self
                    .store
                    .set_partition_status(job_id, index, PartitionStatus::Failed, Some(&message))
                    .await
                {
                    warn!(partition_index = index, error = %store_err, "Could not record partition failure");
                }
                error!(partition_index = index, error = %message, "Fatal error, stopping job");
                Err(e)
            }
        }
    }

    async fn fail_partition(&self, index: usize, message: String) -> JobResult<PartitionOutcome> {
        error!(partition_index = index, error = %message, "Partition failed");
        self.store
            .set_partition_status(self.job.job_id, index, PartitionStatus::Failed, Some(&message))
            .await?;
        Ok(PartitionOutcome::Failed { error: message })
    }

    async fn scan_partition(
        &self,
        spec: &PartitionSpec,
        cursor: &mut ScanCursor,
        checkpoint: Option<&Checkpoint>,
        items_read: u64,
    ) -> Result<(ScanEnd, u64), PartitionFailure> {
        cursor.open(checkpoint).await.map_err(PartitionFailure::Scan)?;

        // After a restart the first row is the checkpointed one, already counted
        let mut replayed: Option<EntityId> = checkpoint.map(|c| c.last_seen_identifier.clone());
        let mut run = PartitionRun {
            items_read,
            unreported: 0,
            chunk: Vec::with_capacity(self.policy.item_count().min(1024) as usize),
            metrics: StepMetrics::with_read_count(0),
        };

        loop {
            if self.cancel.is_cancelled() {
                debug!(
                    partition_index = spec.index,
                    discarded = run.chunk.len(),
                    "Cancelled, discarding uncommitted chunk"
                );
                return Ok((ScanEnd::Cancelled, run.items_read));
            }

            let Some(entity) = cursor.read().await.map_err(PartitionFailure::Scan)? else {
                break;
            };

            let is_replay = replayed.take().is_some_and(|id| id == entity.id);
            if !is_replay {
                run.items_read += 1;
                run.unreported += 1;
            }
            run.metrics.increment(MetricKind::ReadCount);
            run.chunk.push(entity);

            let ready = self
                .policy
                .is_ready_to_checkpoint(&run.metrics)
                .map_err(|e| PartitionFailure::Fatal(e.into()))?;
            if ready {
                self.commit_chunk(spec, cursor.checkpoint_value(), &mut run).await?;
            }
        }

        if !run.chunk.is_empty() {
            self.commit_chunk(spec, cursor.checkpoint_value(), &mut run).await?;
        }
        Ok((ScanEnd::Exhausted, run.items_read))
    }

    /// Write the chunk, then persist the position it ends at
    async fn commit_chunk(
        &self,
        spec: &PartitionSpec,
        checkpoint: Option<Checkpoint>,
        run: &mut PartitionRun,
    ) -> Result<(), PartitionFailure> {
        let chunk = std::mem::take(&mut run.chunk);
        let written = chunk.len();
        self.sink.write(spec, chunk).await.map_err(PartitionFailure::Sink)?;

        if let Some(checkpoint) = checkpoint {
            self.store
                .save_checkpoint(self.job.job_id, &checkpoint, run.items_read)
                .await?;
            debug!(
                partition_index = spec.index,
                last_seen = %checkpoint.last_seen_identifier,
                written,
                items_read = run.items_read,
                "Checkpoint saved"
            );
        }

        if !self.progress.report(spec.index, run.unreported) {
            warn!(partition_index = spec.index, "Progress aggregator is gone");
        }
        run.unreported = 0;
        run.metrics.increment(MetricKind::CommitCount);
        Ok(())
    }
}
