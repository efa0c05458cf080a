//! `massindex plan` command implementation
//!
//! Shows how a job would be partitioned. Nothing is persisted.

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use massindex_core::catalog::PgCatalog;
use massindex_core::{PartitionPlan, PartitionPlanner};
use std::sync::Arc;

use crate::error::Result;
use crate::{Cli, JobArgs};

/// Compute the partition plan and print it
pub async fn run(cli: &Cli, args: &JobArgs, json: bool) -> Result<()> {
    let config = args.to_config()?;
    let pool = super::connect(cli).await?;

    let planner = PartitionPlanner::new(Arc::new(PgCatalog::new(pool)))
        .with_filters(config.filters.clone())
        .with_fetch_size(config.fetch_size);
    let plan = planner
        .plan_with(&config.entity_types, config.strategy())
        .await
        .map_err(massindex_core::JobError::from)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print!("{}", format_plan(&plan));
    }
    Ok(())
}

/// Partition table followed by one row count line per entity type
pub fn format_plan(plan: &PartitionPlan) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["#", "Entity", "Lower bound (incl.)", "Upper bound (excl.)"]);

    for partition in &plan.partitions {
        let render = |bound: Option<String>| bound.unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            partition.index.to_string(),
            partition.entity_type.clone(),
            render(partition.boundary.lower_bound.as_ref().map(ToString::to_string)),
            render(partition.boundary.upper_bound.as_ref().map(ToString::to_string)),
        ]);
    }

    let mut out = format!("{table}\n");
    for entity in &plan.entity_types {
        out.push_str(&format!(
            "{}: {} rows in {} partitions (identifier {})\n",
            entity.name,
            entity.row_count,
            plan.for_entity(&entity.name).count(),
            entity.identifier.name
        ));
    }
    out.push_str(&format!(
        "{} partitions, {} rows, {} threads\n",
        plan.len(),
        plan.total_rows,
        plan.threads()
    ));
    out
}
