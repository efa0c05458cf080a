use chrono::{DateTime, Utc};
use massindex_common::types::{EntityTypeDescriptor, FilterPredicate, FilterSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::config::JobConfig;
use crate::cursor::ScanOptions;
use crate::planner::PartitionPlan;

/// Execution settings frozen into the job so a resume behaves like the original run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSettings {
    pub checkpoint_item_count: u64,
    pub fetch_size: usize,
    pub max_results: Option<u64>,
    pub optimize_at_end: bool,
}

impl From<&JobConfig> for JobSettings {
    fn from(config: &JobConfig) -> Self {
        Self {
            checkpoint_item_count: config.checkpoint_item_count,
            fetch_size: config.fetch_size,
            max_results: config.max_results,
            optimize_at_end: config.optimize_at_end,
        }
    }
}

impl JobSettings {
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            fetch_size: self.fetch_size,
            max_results: self.max_results,
        }
    }
}

/// Everything a job needs after planning. Created once, shared read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobContext {
    pub job_id: Uuid,
    pub entity_type_map: BTreeMap<String, EntityTypeDescriptor>,
    pub total_rows_to_index: u64,
    pub plan: PartitionPlan,
    pub extra_filter_predicates: FilterSet,
    pub settings: JobSettings,
    pub created_at: DateTime<Utc>,
}

impl JobContext {
    pub fn new(plan: PartitionPlan, filters: FilterSet, settings: JobSettings) -> Self {
        let entity_type_map = plan
            .entity_types
            .iter()
            .map(|e| (e.name.clone(), e.clone()))
            .collect();

        Self {
            job_id: Uuid::new_v4(),
            entity_type_map,
            total_rows_to_index: plan.total_rows,
            plan,
            extra_filter_predicates: filters,
            settings,
            created_at: Utc::now(),
        }
    }

    pub fn entity_type(&self, name: &str) -> Option<&EntityTypeDescriptor> {
        self.entity_type_map.get(name)
    }

    pub fn filters_for(&self, entity_type: &str) -> Vec<FilterPredicate> {
        self.extra_filter_predicates.for_entity(entity_type)
    }

    pub fn partition_count(&self) -> usize {
        self.plan.len()
    }
}
