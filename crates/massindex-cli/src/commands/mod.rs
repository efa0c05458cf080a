//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod migrate;
pub mod plan;
pub mod resume;
pub mod run;
pub mod status;

use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use massindex_core::catalog::PgCatalog;
use massindex_core::sink::JsonLinesSink;
use massindex_core::store::{PartitionStatus, PgJobStore};
use massindex_core::{IndexingJob, JobReport, JobResult};
use sqlx::PgPool;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::error::{CliError, Result};
use crate::progress::ProgressDisplay;
use crate::{Cli, OutputArgs};

/// Connect to the database named by the CLI arguments and environment
pub(crate) async fn connect(cli: &Cli) -> Result<PgPool> {
    let config = cli.database_config()?;
    let pool = config.connect().await?;
    info!(max_connections = config.max_connections, "Connected to database");
    Ok(pool)
}

/// Job store with its schema in place
pub(crate) async fn job_store(pool: &PgPool) -> Result<PgJobStore> {
    let store = PgJobStore::new(pool.clone());
    store.migrate().await.map_err(massindex_core::JobError::from)?;
    Ok(store)
}

/// Indexing job reading from PostgreSQL and writing JSON lines into `output`
pub(crate) async fn indexing_job(pool: &PgPool, output: &OutputArgs) -> Result<IndexingJob> {
    let store = job_store(pool).await?;
    Ok(IndexingJob::new(
        Arc::new(PgCatalog::new(pool.clone())),
        Arc::new(store),
        Arc::new(JsonLinesSink::new(output.output.clone())),
    ))
}

/// Run `work` with a progress bar and Ctrl-C wired to the job's cancellation token
pub(crate) async fn drive<F>(job: &IndexingJob, quiet: bool, work: F) -> Result<JobReport>
where
    F: Future<Output = JobResult<JobReport>>,
{
    let token = job.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{}",
                "Interrupted: finishing current reads. Committed chunks are kept.".yellow()
            );
            token.cancel();
        }
    });

    let display = ProgressDisplay::spawn(job.subscribe_progress(), quiet);
    let result = work.await;
    interrupt.abort();

    match result {
        Ok(report) => {
            display.finish(&report.progress);
            Ok(report)
        }
        Err(e) => {
            display.abandon();
            Err(e.into())
        }
    }
}

/// Print a finished run and turn an unfinished job into an error
pub(crate) fn conclude(report: &JobReport) -> Result<()> {
    println!();
    println!("{}", partition_table(report));

    for line in report.progress.summary_lines() {
        println!("{line}");
    }
    println!();

    let status = report.status.to_string();
    let status = if report.is_completed() {
        status.green().bold()
    } else {
        status.red().bold()
    };
    println!(
        "Job {} {} ({} partitions run, {:.1}s)",
        report.job_id.to_string().cyan(),
        status,
        report.partitions_run,
        report.elapsed.as_secs_f64()
    );

    if report.is_completed() {
        Ok(())
    } else {
        Err(CliError::Incomplete {
            job_id: report.job_id,
            status: report.status,
        })
    }
}

fn partition_table(report: &JobReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["#", "Entity", "Status", "Items read", "Error"]);

    for partition in &report.partitions {
        table.add_row(vec![
            partition.partition_index.to_string(),
            partition.entity_type.clone(),
            status_label(partition.status),
            partition.items_read.to_string(),
            partition.error.clone().unwrap_or_default(),
        ]);
    }
    table
}

pub(crate) fn status_label(status: PartitionStatus) -> String {
    match status {
        PartitionStatus::Completed => status.to_string().green().to_string(),
        PartitionStatus::Failed => status.to_string().red().to_string(),
        PartitionStatus::Running | PartitionStatus::Stopped => status.to_string().yellow().to_string(),
        PartitionStatus::Pending => status.to_string(),
    }
}
