//! massindex CLI - Main entry point

use clap::Parser;
use massindex_cli::{Cli, Commands};
use massindex_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Progress bar on stdout, logs on stderr; verbose mode shows debug events
    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Warn })
        .output(LogOutput::Console)
        .log_file_prefix("massindex")
        .filter_directives("sqlx=warn")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env().unwrap_or_else(|e| {
        eprintln!("Ignoring invalid logging environment: {e:#}");
        LogConfig::default()
    });

    // The CLI works without logging
    let _guard = init_logging(&log_config).ok();

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {e}");
        process::exit(e.exit_code());
    }
}

async fn execute_command(cli: &Cli) -> massindex_cli::Result<()> {
    match &cli.command {
        Commands::Plan { job, json } => massindex_cli::commands::plan::run(cli, job, *json).await,
        Commands::Run { job, output } => massindex_cli::commands::run::run(cli, job, output).await,
        Commands::Resume { job_id, output } => {
            massindex_cli::commands::resume::run(cli, *job_id, output).await
        }
        Commands::Status { job_id, json } => {
            massindex_cli::commands::status::run(cli, *job_id, *json).await
        }
        Commands::Migrate => massindex_cli::commands::migrate::run(cli).await,
    }
}
