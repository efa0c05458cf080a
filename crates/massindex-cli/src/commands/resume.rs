//! `massindex resume` command implementation

use colored::Colorize;
use uuid::Uuid;

use crate::error::Result;
use crate::{Cli, OutputArgs};

/// Continue a persisted job; completed partitions are not run again
pub async fn run(cli: &Cli, job_id: Uuid, output: &OutputArgs) -> Result<()> {
    let pool = super::connect(cli).await?;
    let job = super::indexing_job(&pool, output).await?;

    println!("Resuming job {}", job_id.to_string().cyan());
    let report = super::drive(&job, output.quiet, job.resume(job_id)).await?;
    super::conclude(&report)
}
