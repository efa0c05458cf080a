//! PostgreSQL job store
//!
//! Tables `massindex_jobs` and `massindex_partitions` are created by the embedded
//! migrations (see [`PgJobStore::migrate`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use massindex_common::types::{Checkpoint, EntityId};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::debug;
use uuid::Uuid;

use super::{JobStatus, JobStore, PartitionState, PartitionStatus};
use crate::error::StoreError;
use crate::job::JobContext;

/// Partition rows per `INSERT`; each row binds [`PARTITION_INSERT_BINDS`] parameters and
/// one statement may carry at most 65535
pub const PARTITION_INSERT_BATCH: usize = 1000;
const PARTITION_INSERT_BINDS: usize = 5;
const _: () = assert!(PARTITION_INSERT_BATCH * PARTITION_INSERT_BINDS <= u16::MAX as usize);

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    fn partition_from_row(row: &PgRow) -> Result<PartitionState, StoreError> {
        let index: i32 = row.try_get("partition_index")?;
        let status: String = row.try_get("status")?;
        let checkpoint: Option<Json<Checkpoint>> = row.try_get("checkpoint")?;
        let items_read: i64 = row.try_get("items_read")?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

        Ok(PartitionState {
            partition_index: usize::try_from(index)
                .map_err(|_| StoreError::Corrupt(format!("negative partition index {index}")))?,
            status: status.parse()?,
            checkpoint: checkpoint.map(|Json(c)| c),
            items_read: u64::try_from(items_read).unwrap_or(0),
            last_error: row.try_get("last_error")?,
            updated_at,
        })
    }
}

fn to_i32(partition_index: usize) -> Result<i32, StoreError> {
    i32::try_from(partition_index).map_err(|_| StoreError::Corrupt(format!("partition index {partition_index} too large")))
}

fn not_found_if_zero(rows: u64, job_id: Uuid, partition_index: usize) -> Result<(), StoreError> {
    if rows == 0 {
        return Err(StoreError::PartitionNotFound {
            job_id,
            partition_index,
        });
    }
    Ok(())
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn save_context(&self, context: &JobContext) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO massindex_jobs (id, status, context, total_rows, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(context.job_id)
        .bind(JobStatus::Pending.as_str())
        .bind(Json(context))
        .bind(i64::try_from(context.total_rows_to_index).unwrap_or(i64::MAX))
        .bind(context.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            let duplicate = e.as_database_error().is_some_and(|d| d.is_unique_violation());
            return Err(if duplicate {
                StoreError::JobExists(context.job_id)
            } else {
                e.into()
            });
        }

        for batch in context.plan.partitions.chunks(PARTITION_INSERT_BATCH) {
            let mut rows: Vec<(i32, String, Option<Json<EntityId>>, Option<Json<EntityId>>)> =
                Vec::with_capacity(batch.len());
            for partition in batch {
                rows.push((
                    to_i32(partition.index)?,
                    partition.entity_type.clone(),
                    partition.boundary.lower_bound.clone().map(Json),
                    partition.boundary.upper_bound.clone().map(Json),
                ));
            }

            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO massindex_partitions (job_id, partition_index, entity_type, lower_bound, upper_bound) ",
            );
            builder.push_values(rows, |mut b, (index, entity_type, lower, upper)| {
                b.push_bind(context.job_id)
                    .push_bind(index)
                    .push_bind(entity_type)
                    .push_bind(lower)
                    .push_bind(upper);
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        debug!(job_id = %context.job_id, partitions = context.plan.len(), "Job context saved");
        Ok(())
    }

    async fn load_context(&self, job_id: Uuid) -> Result<JobContext, StoreError> {
        let context: Option<Json<JobContext>> = sqlx::query_scalar("SELECT context FROM massindex_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        context.map(|Json(c)| c).ok_or(StoreError::JobNotFound(job_id))
    }

    async fn job_status(&self, job_id: Uuid) -> Result<JobStatus, StoreError> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM massindex_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        status.ok_or(StoreError::JobNotFound(job_id))?.parse()
    }

    async fn set_job_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE massindex_jobs
            SET status = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(status.as_str())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(job_id));
        }
        Ok(())
    }

    async fn partition_states(&self, job_id: Uuid) -> Result<Vec<PartitionState>, StoreError> {
        // Distinguish "no such job" from "job without partitions"
        self.job_status(job_id).await?;

        let rows = sqlx::query(
            r#"
            SELECT partition_index, status, checkpoint, items_read, last_error, updated_at
            FROM massindex_partitions
            WHERE job_id = $1
            ORDER BY partition_index
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::partition_from_row).collect()
    }

    async fn partition_state(&self, job_id: Uuid, partition_index: usize) -> Result<PartitionState, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT partition_index, status, checkpoint, items_read, last_error, updated_at
            FROM massindex_partitions
            WHERE job_id = $1 AND partition_index = $2
            "#,
        )
        .bind(job_id)
        .bind(to_i32(partition_index)?)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::PartitionNotFound {
            job_id,
            partition_index,
        })?;

        Self::partition_from_row(&row)
    }

    async fn save_checkpoint(&self, job_id: Uuid, checkpoint: &Checkpoint, items_read: u64) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE massindex_partitions
            SET checkpoint = $1, items_read = $2, updated_at = NOW()
            WHERE job_id = $3 AND partition_index = $4
            "#,
        )
        .bind(Json(checkpoint))
        .bind(i64::try_from(items_read).unwrap_or(i64::MAX))
        .bind(job_id)
        .bind(to_i32(checkpoint.partition_index)?)
        .execute(&self.pool)
        .await?;

        not_found_if_zero(result.rows_affected(), job_id, checkpoint.partition_index)
    }

    async fn set_partition_status(
        &self,
        job_id: Uuid,
        partition_index: usize,
        status: PartitionStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE massindex_partitions
            SET status = $1, last_error = $2, updated_at = NOW()
            WHERE job_id = $3 AND partition_index = $4
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(job_id)
        .bind(to_i32(partition_index)?)
        .execute(&self.pool)
        .await?;

        not_found_if_zero(result.rows_affected(), job_id, partition_index)
    }
}
