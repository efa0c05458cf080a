//! `massindex migrate` command implementation

use colored::Colorize;

use crate::error::Result;
use crate::Cli;

/// Create or upgrade the job state tables
pub async fn run(cli: &Cli) -> Result<()> {
    let pool = super::connect(cli).await?;
    super::job_store(&pool).await?;
    println!("{}", "Job state tables are up to date.".green());
    Ok(())
}
