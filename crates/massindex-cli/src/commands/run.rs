//! `massindex run` command implementation
//!
//! Plans, persists and runs a new job. A job that ends stopped or failed prints its
//! id so it can be continued with `massindex resume`.

use colored::Colorize;

use crate::error::Result;
use crate::{Cli, JobArgs, OutputArgs};

/// Plan and run a new indexing job
pub async fn run(cli: &Cli, args: &JobArgs, output: &OutputArgs) -> Result<()> {
    let config = args.to_config()?;
    let pool = super::connect(cli).await?;
    let job = super::indexing_job(&pool, output).await?;

    println!(
        "Indexing {} into {}",
        config.entity_types.join(", ").cyan(),
        output.output.display()
    );
    let report = super::drive(&job, output.quiet, job.start(&config)).await?;
    super::conclude(&report)
}
