//! Durable job state
//!
//! A job is persisted once, right after planning succeeded: its [`JobContext`] (plan
//! included) plus one `pending` row per partition. Workers then overwrite their
//! partition's checkpoint and status in place. Resuming a job only reads this state;
//! nothing is planned again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use massindex_common::types::Checkpoint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::StoreError;
use crate::job::JobContext;

pub mod memory;
pub mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::{PgJobStore, PARTITION_INSERT_BATCH};

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "stopped" => Ok(JobStatus::Stopped),
            other => Err(StoreError::Corrupt(format!("unknown job status '{other}'"))),
        }
    }
}

/// Partition lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl PartitionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PartitionStatus::Pending => "pending",
            PartitionStatus::Running => "running",
            PartitionStatus::Completed => "completed",
            PartitionStatus::Failed => "failed",
            PartitionStatus::Stopped => "stopped",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, PartitionStatus::Completed)
    }
}

impl fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartitionStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PartitionStatus::Pending),
            "running" => Ok(PartitionStatus::Running),
            "completed" => Ok(PartitionStatus::Completed),
            "failed" => Ok(PartitionStatus::Failed),
            "stopped" => Ok(PartitionStatus::Stopped),
            other => Err(StoreError::Corrupt(format!("unknown partition status '{other}'"))),
        }
    }
}

/// Persisted state of one partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionState {
    pub partition_index: usize,
    pub status: PartitionStatus,
    pub checkpoint: Option<Checkpoint>,
    /// Items read up to the checkpoint
    pub items_read: u64,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PartitionState {
    pub fn pending(partition_index: usize) -> Self {
        Self {
            partition_index,
            status: PartitionStatus::Pending,
            checkpoint: None,
            items_read: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

/// Persistence for job contexts, checkpoints and statuses
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job with every partition `pending`. Fails if the job exists.
    async fn save_context(&self, context: &JobContext) -> Result<(), StoreError>;

    async fn load_context(&self, job_id: Uuid) -> Result<JobContext, StoreError>;

    async fn job_status(&self, job_id: Uuid) -> Result<JobStatus, StoreError>;

    async fn set_job_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), StoreError>;

    /// All partitions of a job, by index
    async fn partition_states(&self, job_id: Uuid) -> Result<Vec<PartitionState>, StoreError>;

    async fn partition_state(&self, job_id: Uuid, partition_index: usize) -> Result<PartitionState, StoreError>;

    /// Overwrite a partition's checkpoint and read count
    async fn save_checkpoint(&self, job_id: Uuid, checkpoint: &Checkpoint, items_read: u64) -> Result<(), StoreError>;

    async fn set_partition_status(
        &self,
        job_id: Uuid,
        partition_index: usize,
        status: PartitionStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;
}
