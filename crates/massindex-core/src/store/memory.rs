//! In-process job store, for tests and single-run jobs

use async_trait::async_trait;
use chrono::Utc;
use massindex_common::types::Checkpoint;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::{JobStatus, JobStore, PartitionState, PartitionStatus};
use crate::error::StoreError;
use crate::job::JobContext;

#[derive(Debug, Clone)]
struct StoredJob {
    context: JobContext,
    status: JobStatus,
    partitions: Vec<PartitionState>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<Mutex<HashMap<Uuid, StoredJob>>>,
    fail_checkpoints: Arc<AtomicBool>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `save_checkpoint` fail
    pub fn fail_checkpoint_saves(&self, fail: bool) {
        self.fail_checkpoints.store(fail, Ordering::SeqCst);
    }

    pub fn job_ids(&self) -> Vec<Uuid> {
        self.jobs().keys().copied().collect()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<Uuid, StoredJob>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_partition<T>(
        &self,
        job_id: Uuid,
        partition_index: usize,
        f: impl FnOnce(&mut PartitionState) -> T,
    ) -> Result<T, StoreError> {
        let mut jobs = self.jobs();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        let partition = job
            .partitions
            .get_mut(partition_index)
            .ok_or(StoreError::PartitionNotFound {
                job_id,
                partition_index,
            })?;
        let result = f(partition);
        partition.updated_at = Utc::now();
        Ok(result)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save_context(&self, context: &JobContext) -> Result<(), StoreError> {
        let mut jobs = self.jobs();
        if jobs.contains_key(&context.job_id) {
            return Err(StoreError::JobExists(context.job_id));
        }
        let partitions = (0..context.partition_count()).map(PartitionState::pending).collect();
        jobs.insert(
            context.job_id,
            StoredJob {
                context: context.clone(),
                status: JobStatus::Pending,
                partitions,
            },
        );
        Ok(())
    }

    async fn load_context(&self, job_id: Uuid) -> Result<JobContext, StoreError> {
        self.jobs()
            .get(&job_id)
            .map(|job| job.context.clone())
            .ok_or(StoreError::JobNotFound(job_id))
    }

    async fn job_status(&self, job_id: Uuid) -> Result<JobStatus, StoreError> {
        self.jobs()
            .get(&job_id)
            .map(|job| job.status)
            .ok_or(StoreError::JobNotFound(job_id))
    }

    async fn set_job_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), StoreError> {
        let mut jobs = self.jobs();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        job.status = status;
        Ok(())
    }

    async fn partition_states(&self, job_id: Uuid) -> Result<Vec<PartitionState>, StoreError> {
        self.jobs()
            .get(&job_id)
            .map(|job| job.partitions.clone())
            .ok_or(StoreError::JobNotFound(job_id))
    }

    async fn partition_state(&self, job_id: Uuid, partition_index: usize) -> Result<PartitionState, StoreError> {
        self.with_partition(job_id, partition_index, |p| p.clone())
    }

    async fn save_checkpoint(&self, job_id: Uuid, checkpoint: &Checkpoint, items_read: u64) -> Result<(), StoreError> {
        if self.fail_checkpoints.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("checkpoint storage unavailable".to_string()));
        }
        self.with_partition(job_id, checkpoint.partition_index, |p| {
            p.checkpoint = Some(checkpoint.clone());
            p.items_read = items_read;
        })
    }

    async fn set_partition_status(
        &self,
        job_id: Uuid,
        partition_index: usize,
        status: PartitionStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_partition(job_id, partition_index, |p| {
            p.status = status;
            p.last_error = error.map(String::from);
        })
    }
}
