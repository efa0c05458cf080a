//! `massindex status` command implementation
//!
//! Shows the persisted state of a job: its plan, each partition's status and the
//! checkpoint a resume would start from.

use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use massindex_core::store::{JobStore, PartitionState};
use massindex_core::{JobContext, JobError};
use serde_json::json;
use uuid::Uuid;

use crate::error::Result;
use crate::Cli;

/// Print the state of one job
pub async fn run(cli: &Cli, job_id: Uuid, json: bool) -> Result<()> {
    let pool = super::connect(cli).await?;
    let store = super::job_store(&pool).await?;

    let context = store.load_context(job_id).await.map_err(JobError::from)?;
    let status = store.job_status(job_id).await.map_err(JobError::from)?;
    let states = store.partition_states(job_id).await.map_err(JobError::from)?;

    if json {
        let out = json!({
            "jobId": job_id,
            "status": status,
            "createdAt": context.created_at,
            "totalRowsToIndex": context.total_rows_to_index,
            "settings": context.settings,
            "partitions": states,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{} {}", "Job".cyan().bold(), job_id);
    println!("  Status:  {status}");
    println!("  Created: {}", context.created_at);
    println!("  Rows:    {}", context.total_rows_to_index);
    println!();
    println!("{}", state_table(&context, &states));

    let items_read: u64 = states.iter().map(|s| s.items_read).sum();
    println!(
        "{} of {} rows checkpointed",
        items_read, context.total_rows_to_index
    );
    Ok(())
}

fn state_table(context: &JobContext, states: &[PartitionState]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["#", "Entity", "Range", "Status", "Items read", "Checkpoint", "Error"]);

    for state in states {
        let (entity, range) = context
            .plan
            .get(state.partition_index)
            .map(|p| (p.entity_type.clone(), p.boundary.to_string()))
            .unwrap_or_default();
        table.add_row(vec![
            state.partition_index.to_string(),
            entity,
            range,
            super::status_label(state.status),
            state.items_read.to_string(),
            state
                .checkpoint
                .as_ref()
                .map(|c| c.last_seen_identifier.to_string())
                .unwrap_or_else(|| "-".to_string()),
            state.last_error.clone().unwrap_or_default(),
        ]);
    }
    table
}
