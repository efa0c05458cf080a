//! massindex CLI Library
//!
//! Command-line interface for planning, running and resuming mass indexing jobs
//! against a PostgreSQL database.
//!
//! # Overview
//!
//! - **Planning**: preview the partitions of a job without running it (`massindex plan`)
//! - **Indexing**: plan, persist and run a job (`massindex run`)
//! - **Restart**: continue a stopped or failed job from its checkpoints (`massindex resume`)
//! - **Inspection**: show the persisted state of a job (`massindex status`)
//! - **Schema**: create the job state tables (`massindex migrate`)

pub mod commands;
pub mod error;
pub mod progress;

// Re-export commonly used types
pub use error::{CliError, Result};

use clap::{Args, Parser, Subcommand};
use massindex_common::types::FilterPredicate;
use massindex_core::config::{
    DEFAULT_CHECKPOINT_ITEM_COUNT, DEFAULT_FETCH_SIZE, DEFAULT_PARTITIONS, DEFAULT_THREADS,
};
use massindex_core::{DatabaseConfig, JobConfig};
use std::path::PathBuf;
use uuid::Uuid;

/// massindex - partitioned, resumable mass indexing of database tables
#[derive(Parser, Debug)]
#[command(name = "massindex")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Database URL (overrides DATABASE_URL from the environment or .env)
    #[arg(long, global = true)]
    pub database_url: Option<String>,
}

impl Cli {
    /// Database settings from the environment, with `--database-url` applied
    pub fn database_config(&self) -> Result<DatabaseConfig> {
        let mut config = DatabaseConfig::from_env()?;
        if let Some(url) = &self.database_url {
            config.url = url.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute and print the partition plan of a job without running it
    Plan {
        #[command(flatten)]
        job: JobArgs,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Plan, persist and run a new indexing job
    Run {
        #[command(flatten)]
        job: JobArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Continue a stopped or failed job from its last checkpoints
    Resume {
        /// Job identifier printed by `massindex run`
        job_id: Uuid,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Show the persisted state of a job
    Status {
        /// Job identifier
        job_id: Uuid,

        /// Print the state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create or upgrade the job state tables
    Migrate,
}

/// Where indexed documents are written
#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Index directory (one JSON lines file per partition)
    #[arg(short, long, env = "MASSINDEX_OUTPUT_DIR", default_value = "index")]
    pub output: PathBuf,

    /// Hide the progress bar
    #[arg(long)]
    pub quiet: bool,
}

/// Job selection and tuning
#[derive(Args, Debug, Clone)]
pub struct JobArgs {
    /// Entity types (tables) to index, e.g. `Company Employee` or `public.company`
    #[arg(required = true, value_delimiter = ',')]
    pub entity_types: Vec<String>,

    /// Initial partitions per thread
    #[arg(short, long, env = "MASSINDEX_PARTITIONS", default_value_t = DEFAULT_PARTITIONS)]
    pub partitions: usize,

    /// Concurrent partition workers
    #[arg(short, long, env = "MASSINDEX_THREADS", default_value_t = DEFAULT_THREADS)]
    pub threads: usize,

    /// Fixed rows per partition instead of balancing over partitions * threads
    #[arg(long, env = "MASSINDEX_ROWS_PER_PARTITION")]
    pub rows_per_partition: Option<u64>,

    /// Items read between two checkpoints
    #[arg(long, env = "MASSINDEX_CHECKPOINT_ITEM_COUNT", default_value_t = DEFAULT_CHECKPOINT_ITEM_COUNT)]
    pub item_count: u64,

    /// Rows fetched per database round trip
    #[arg(long, env = "MASSINDEX_FETCH_SIZE", default_value_t = DEFAULT_FETCH_SIZE)]
    pub fetch_size: usize,

    /// Maximum rows read per partition opening
    #[arg(long, env = "MASSINDEX_MAX_RESULTS")]
    pub max_results: Option<u64>,

    /// Restriction `[Entity:]field op value` (op: = < <= > >=); repeatable
    #[arg(short, long = "filter", value_name = "FILTER")]
    pub filters: Vec<String>,

    /// Raw SQL condition applied to every entity type; repeatable
    #[arg(long = "where", value_name = "SQL")]
    pub conditions: Vec<String>,

    /// Clear the index of the selected entity types before indexing
    #[arg(long, env = "MASSINDEX_PURGE_AT_START")]
    pub purge: bool,

    /// Merge each entity type's partition files once every partition completed
    #[arg(long, env = "MASSINDEX_OPTIMIZE_AT_END")]
    pub optimize: bool,
}

impl JobArgs {
    /// Build and validate the job configuration
    pub fn to_config(&self) -> Result<JobConfig> {
        let mut config = JobConfig::new(self.entity_types.iter().map(|e| e.trim().to_string()));
        config.partitions = self.partitions;
        config.threads = self.threads;
        config.rows_per_partition = self.rows_per_partition;
        config.checkpoint_item_count = self.item_count;
        config.fetch_size = self.fetch_size;
        config.max_results = self.max_results;
        config.purge_at_start = self.purge;
        config.optimize_at_end = self.optimize;

        for filter in &self.filters {
            config
                .add_filter(filter)
                .map_err(|e| CliError::InvalidFilter(format!("{e:#}")))?;
        }
        for condition in &self.conditions {
            config.filters = std::mem::take(&mut config.filters).with_global(FilterPredicate::raw(condition.clone()));
        }

        config.validate().map_err(|e| CliError::config(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("massindex").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_run_arguments_build_config() {
        let cli = parse(&[
            "run",
            "Company,Employee",
            "--partitions",
            "2",
            "--threads",
            "3",
            "--filter",
            "Employee:salary >= 1000",
            "--where",
            "deleted_at IS NULL",
            "--optimize",
            "-o",
            "/tmp/index",
        ]);
        let Commands::Run { job, output } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(output.output, PathBuf::from("/tmp/index"));

        let config = job.to_config().unwrap();
        assert_eq!(config.entity_types, vec!["Company", "Employee"]);
        assert_eq!(config.partitions, 2);
        assert_eq!(config.threads, 3);
        assert!(config.optimize_at_end);
        assert!(!config.purge_at_start);
        assert_eq!(config.filters.for_entity("Employee").len(), 2);
        assert_eq!(config.filters.for_entity("Company").len(), 1);
    }

    #[test]
    fn test_invalid_filter_is_reported() {
        let cli = parse(&["plan", "Employee", "--filter", "salary"]);
        let Commands::Plan { job, .. } = cli.command else {
            panic!("expected plan");
        };
        assert!(matches!(job.to_config(), Err(CliError::InvalidFilter(_))));
    }

    #[test]
    fn test_zero_threads_is_rejected() {
        let cli = parse(&["plan", "Employee", "--threads", "0"]);
        let Commands::Plan { job, .. } = cli.command else {
            panic!("expected plan");
        };
        assert!(matches!(job.to_config(), Err(CliError::Config(_))));
    }

    #[test]
    fn test_resume_requires_a_uuid() {
        let result = Cli::try_parse_from(["massindex", "resume", "not-a-job"]);
        assert!(result.is_err());
    }
}
