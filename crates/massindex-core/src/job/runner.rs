//! Job orchestration: plan, persist, run partitions, finish

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::worker::{PartitionOutcome, WorkQueue, Worker};
use super::{JobContext, JobSettings};
use crate::catalog::EntityCatalog;
use crate::checkpoint::CheckpointPolicy;
use crate::config::JobConfig;
use crate::error::{JobError, JobResult, StoreError};
use crate::planner::{PartitionPlan, PartitionPlanner};
use crate::progress::{ProgressAggregator, ProgressSnapshot};
use crate::sink::IndexSink;
use crate::store::{JobStatus, JobStore, PartitionState, PartitionStatus};

/// Final state of one partition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionReport {
    pub partition_index: usize,
    pub entity_type: String,
    pub status: PartitionStatus,
    pub items_read: u64,
    pub error: Option<String>,
}

/// Result of one `start` or `resume`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub partitions: Vec<PartitionReport>,
    pub progress: ProgressSnapshot,
    /// Partitions executed by this run (completed ones from earlier runs excluded)
    pub partitions_run: usize,
    pub elapsed: Duration,
}

impl JobReport {
    pub fn count(&self, status: PartitionStatus) -> usize {
        self.partitions.iter().filter(|p| p.status == status).count()
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Runs mass indexing jobs against one catalog, store and sink
pub struct IndexingJob {
    catalog: Arc<dyn EntityCatalog>,
    store: Arc<dyn JobStore>,
    sink: Arc<dyn IndexSink>,
    cancel: CancellationToken,
    progress: watch::Sender<ProgressSnapshot>,
}

impl IndexingJob {
    pub fn new(catalog: Arc<dyn EntityCatalog>, store: Arc<dyn JobStore>, sink: Arc<dyn IndexSink>) -> Self {
        let (progress, _) = watch::channel(ProgressSnapshot::default());
        Self {
            catalog,
            store,
            sink,
            cancel: CancellationToken::new(),
            progress,
        }
    }

    /// Cancelling this token stops the running job gracefully
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Progress snapshots of the job currently running
    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.subscribe()
    }

    /// Compute a plan without persisting anything
    pub async fn plan(&self, config: &JobConfig) -> JobResult<PartitionPlan> {
        config.validate().map_err(|e| JobError::Config(e.to_string()))?;
        let planner = PartitionPlanner::new(self.catalog.clone())
            .with_filters(config.filters.clone())
            .with_fetch_size(config.fetch_size);
        Ok(planner.plan_with(&config.entity_types, config.strategy()).await?)
    }

    /// Plan and persist a new job, purging the index first if configured
    pub async fn prepare(&self, config: &JobConfig) -> JobResult<JobContext> {
        // Fail before planning if checkpointing is misconfigured
        CheckpointPolicy::new(config.checkpoint_item_count)?;

        let plan = self.plan(config).await?;
        let context = JobContext::new(plan, config.filters.clone(), JobSettings::from(config));
        self.store.save_context(&context).await?;
        info!(
            job_id = %context.job_id,
            partitions = context.partition_count(),
            total_rows = context.total_rows_to_index,
            "Job created"
        );

        if config.purge_at_start {
            let entity_types: Vec<String> = context.entity_type_map.keys().cloned().collect();
            self.sink.purge(&entity_types).await?;
        }
        Ok(context)
    }

    /// Plan, persist and run a new job
    pub async fn start(&self, config: &JobConfig) -> JobResult<JobReport> {
        let context = self.prepare(config).await?;
        self.run(context).await
    }

    /// Continue a persisted job. Completed partitions are skipped; the others restart
    /// from their last checkpoint.
    pub async fn resume(&self, job_id: Uuid) -> JobResult<JobReport> {
        let context = self.store.load_context(job_id).await?;
        info!(job_id = %job_id, "Resuming job");
        self.run(context).await
    }

    async fn run(&self, context: JobContext) -> JobResult<JobReport> {
        let started = Instant::now();
        let job_id = context.job_id;
        let policy = CheckpointPolicy::new(context.settings.checkpoint_item_count)?;

        let states = self.store.partition_states(job_id).await?;
        let items_read: BTreeMap<usize, u64> = states
            .iter()
            .filter(|s| s.items_read > 0)
            .map(|s| (s.partition_index, s.items_read))
            .collect();
        let pending: Vec<usize> = states
            .iter()
            .filter(|s| !s.status.is_completed())
            .map(|s| s.partition_index)
            .collect();

        let aggregator = ProgressAggregator::seeded(&context.plan, &items_read)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        self.store.set_job_status(job_id, JobStatus::Running).await?;

        let threads = context.plan.threads().max(1).min(pending.len());
        info!(
            job_id = %job_id,
            partitions = context.partition_count(),
            pending = pending.len(),
            threads,
            "Running partitions"
        );

        let (progress, aggregation) = aggregator.spawn_with(self.progress.clone());
        let run_cancel = self.cancel.child_token();
        let queue = Arc::new(WorkQueue::new(pending));
        let partitions_run = queue.len();
        let context = Arc::new(context);
        let worker = Arc::new(Worker {
            job: context.clone(),
            catalog: self.catalog.clone(),
            store: self.store.clone(),
            sink: self.sink.clone(),
            policy,
            progress,
            cancel: run_cancel.clone(),
        });

        let mut workers = JoinSet::new();
        for worker_id in 0..threads {
            workers.spawn(worker.clone().run(worker_id, queue.clone()));
        }
        // The aggregation task ends once the last worker drops its handle
        drop(worker);

        let mut fatal: Option<JobError> = None;
        while let Some(joined) = workers.join_next().await {
            let result = joined.map_err(|e| JobError::Worker(e.to_string())).and_then(|r| r);
            match result {
                Ok(outcomes) => {
                    for (index, outcome) in outcomes {
                        if let PartitionOutcome::Failed { error } = outcome {
                            warn!(partition_index = index, error = %error, "Partition will need a resume");
                        }
                    }
                }
                Err(e) => {
                    run_cancel.cancel();
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
            }
        }

        let progress = aggregation.await.map_err(|e| JobError::Worker(e.to_string()))?;
        progress.log();

        if let Some(e) = fatal {
            error!(job_id = %job_id, error = %e, "Job failed");
            if let Err(store_err) = self.store.set_job_status(job_id, JobStatus::Failed).await {
                warn!(job_id = %job_id, error = %store_err, "Could not record job failure");
            }
            return Err(e);
        }

        let states = self.store.partition_states(job_id).await?;
        let mut status = final_status(&states);

        if status == JobStatus::Completed && context.settings.optimize_at_end {
            let entity_types: Vec<String> = context.entity_type_map.keys().cloned().collect();
            if let Err(e) = self.sink.optimize(&entity_types).await {
                error!(job_id = %job_id, error = %e, "Optimize failed");
                status = JobStatus::Failed;
                self.store.set_job_status(job_id, status).await?;
                return Err(e.into());
            }
        }

        self.store.set_job_status(job_id, status).await?;

        let report = JobReport {
            job_id,
            status,
            partitions: reports(&context, &states),
            progress,
            partitions_run,
            elapsed: started.elapsed(),
        };
        info!(
            job_id = %job_id,
            status = %status,
            completed = report.count(PartitionStatus::Completed),
            failed = report.count(PartitionStatus::Failed),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Job finished"
        );
        Ok(report)
    }
}

fn final_status(states: &[PartitionState]) -> JobStatus {
    if states.iter().all(|s| s.status.is_completed()) {
        JobStatus::Completed
    } else if states.iter().any(|s| s.status == PartitionStatus::Failed) {
        JobStatus::Failed
    } else {
        JobStatus::Stopped
    }
}

fn reports(context: &JobContext, states: &[PartitionState]) -> Vec<PartitionReport> {
    states
        .iter()
        .map(|s| PartitionReport {
            partition_index: s.partition_index,
            entity_type: context
                .plan
                .get(s.partition_index)
                .map(|p| p.entity_type.clone())
                .unwrap_or_default(),
            status: s.status,
            items_read: s.items_read,
            error: s.last_error.clone(),
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn state(index: usize, status: PartitionStatus) -> PartitionState {
        PartitionState {
            status,
            ..PartitionState::pending(index)
        }
    }

    #[test]
    fn test_final_status() {
        assert_eq!(
            final_status(&[state(0, PartitionStatus::Completed), state(1, PartitionStatus::Completed)]),
            JobStatus::Completed
        );
        assert_eq!(
            final_status(&[state(0, PartitionStatus::Completed), state(1, PartitionStatus::Failed)]),
            JobStatus::Failed
        );
        assert_eq!(
            final_status(&[state(0, PartitionStatus::Stopped), state(1, PartitionStatus::Pending)]),
            JobStatus::Stopped
        );
    }
}
