//! Partition planning
//!
//! Splits the selected entity types into contiguous identifier ranges:
//!
//! 1. Count rows per entity type (filters applied) and make one unit per type
//! 2. Repeatedly halve the largest unit until `partitions * threads` units exist
//! 3. For each entity type with `k` units, walk its identifiers in order and cut every
//!    `rows / k` rows, then add one trailing open-ended partition
//!
//! The trailing partition picks up rows inserted after planning, so every identifier of
//! an entity type falls into exactly one of its partitions.

use massindex_common::types::{
    EntityId, EntityTypeDescriptor, FilterSet, PartitionBoundary, PartitionRecord,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::{EntityCatalog, ScanRequest};
use crate::config::DEFAULT_FETCH_SIZE;
use crate::error::PlanningError;

/// How the planner sizes partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// `partitions * threads` partitions balanced across entity types by row count
    Balanced { partitions: usize, threads: usize },
    /// Fixed number of rows per partition
    RowsPerPartition { rows: u64, threads: usize },
}

impl PartitionStrategy {
    pub fn threads(&self) -> usize {
        match self {
            PartitionStrategy::Balanced { threads, .. } | PartitionStrategy::RowsPerPartition { threads, .. } => {
                *threads
            }
        }
    }

    /// Requested initial partitions per thread (`P`); `None` for fixed-size partitioning
    pub fn requested_partitions(&self) -> Option<usize> {
        match self {
            PartitionStrategy::Balanced { partitions, .. } => Some(*partitions),
            PartitionStrategy::RowsPerPartition { .. } => None,
        }
    }

    fn validate(&self) -> Result<(), PlanningError> {
        match *self {
            PartitionStrategy::Balanced { partitions: 0, .. } => Err(PlanningError::InvalidParameters(
                "partitions must be greater than 0".to_string(),
            )),
            PartitionStrategy::RowsPerPartition { rows: 0, .. } => Err(PlanningError::InvalidParameters(
                "rows per partition must be greater than 0".to_string(),
            )),
            _ if self.threads() == 0 => Err(PlanningError::InvalidParameters(
                "threads must be greater than 0".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Work unit used while balancing: a slice of one entity type's rows.
///
/// Ordered by row count, ties broken by entity name ascending (the alphabetically
/// first name is the greater unit), so a max-heap pops units deterministically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionUnit {
    pub entity_type: String,
    pub row_count: u64,
}

impl PartitionUnit {
    pub fn new(entity_type: impl Into<String>, row_count: u64) -> Self {
        Self {
            entity_type: entity_type.into(),
            row_count,
        }
    }

    /// Halve into `floor(n/2)` and `ceil(n/2)` rows of the same entity type
    pub fn split(&self) -> (PartitionUnit, PartitionUnit) {
        let low = self.row_count / 2;
        let high = self.row_count - low;
        (
            PartitionUnit::new(self.entity_type.clone(), low),
            PartitionUnit::new(self.entity_type.clone(), high),
        )
    }
}

impl Ord for PartitionUnit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.row_count
            .cmp(&other.row_count)
            .then_with(|| other.entity_type.cmp(&self.entity_type))
    }
}

impl PartialOrd for PartitionUnit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Split the largest units until `target` units exist.
///
/// Units of at most one row are never split; if only those remain, splitting stops
/// early. Never merges, so more input units than `target` are returned as they are.
/// The result is sorted by entity name so units of one type are contiguous.
pub fn split_units(units: Vec<PartitionUnit>, target: usize) -> Vec<PartitionUnit> {
    let mut heap: BinaryHeap<PartitionUnit> = units.into_iter().collect();

    while heap.len() < target {
        let Some(largest) = heap.pop() else {
            break;
        };
        if largest.row_count <= 1 {
            heap.push(largest);
            break;
        }
        let (low, high) = largest.split();
        heap.push(low);
        heap.push(high);
    }

    let mut units = heap.into_vec();
    units.sort_by(|a, b| a.entity_type.cmp(&b.entity_type));
    units
}

/// One partition of the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionSpec {
    /// Global index across the whole plan, starting at 0
    pub index: usize,
    pub entity_type: String,
    pub boundary: PartitionBoundary,
}

impl PartitionSpec {
    pub fn to_record(&self) -> PartitionRecord {
        PartitionRecord {
            entity_type_name: self.entity_type.clone(),
            partition_index: self.index,
            lower_bound: self.boundary.lower_bound.clone(),
            upper_bound: self.boundary.upper_bound.clone(),
        }
    }
}

/// Ordered list of partitions, entity-type-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionPlan {
    pub partitions: Vec<PartitionSpec>,
    pub strategy: PartitionStrategy,
    pub entity_types: Vec<EntityTypeDescriptor>,
    pub total_rows: u64,
}

impl PartitionPlan {
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn threads(&self) -> usize {
        self.strategy.threads()
    }

    pub fn requested_partitions(&self) -> Option<usize> {
        self.strategy.requested_partitions()
    }

    pub fn get(&self, index: usize) -> Option<&PartitionSpec> {
        self.partitions.get(index)
    }

    pub fn for_entity<'a>(&'a self, entity_type: &'a str) -> impl Iterator<Item = &'a PartitionSpec> + 'a {
        self.partitions.iter().filter(move |p| p.entity_type == entity_type)
    }

    pub fn entity_type(&self, name: &str) -> Option<&EntityTypeDescriptor> {
        self.entity_types.iter().find(|e| e.name == name)
    }

    pub fn to_records(&self) -> Vec<PartitionRecord> {
        self.partitions.iter().map(PartitionSpec::to_record).collect()
    }

    /// Rebuild a plan from its persisted records
    pub fn from_records(
        records: Vec<PartitionRecord>,
        strategy: PartitionStrategy,
        entity_types: Vec<EntityTypeDescriptor>,
    ) -> Result<Self, PlanningError> {
        let mut records = records;
        records.sort_by_key(|r| r.partition_index);

        let mut partitions = Vec::with_capacity(records.len());
        for record in records {
            let boundary = record.boundary().map_err(|e| PlanningError::InvalidCover {
                entity_type: record.entity_type_name.clone(),
                reason: e.to_string(),
            })?;
            partitions.push(PartitionSpec {
                index: record.partition_index,
                entity_type: record.entity_type_name,
                boundary,
            });
        }

        let plan = Self {
            total_rows: entity_types.iter().map(|e| e.row_count).sum(),
            partitions,
            strategy,
            entity_types,
        };
        plan.validate_cover()?;
        Ok(plan)
    }

    /// Check that indices run `0..len` and that each entity type's partitions form one
    /// contiguous, gap-free, non-overlapping run open at both ends
    pub fn validate_cover(&self) -> Result<(), PlanningError> {
        let invalid = |entity_type: &str, reason: String| PlanningError::InvalidCover {
            entity_type: entity_type.to_string(),
            reason,
        };

        let mut seen: Vec<&str> = Vec::new();
        let mut previous: Option<&PartitionSpec> = None;

        for (position, partition) in self.partitions.iter().enumerate() {
            if partition.index != position {
                return Err(invalid(
                    &partition.entity_type,
                    format!("partition at position {position} has index {}", partition.index),
                ));
            }

            let continues_run = previous.is_some_and(|p| p.entity_type == partition.entity_type);
            if continues_run {
                let prev_upper = previous.and_then(|p| p.boundary.upper_bound.as_ref());
                if prev_upper.is_none() || prev_upper != partition.boundary.lower_bound.as_ref() {
                    return Err(invalid(
                        &partition.entity_type,
                        format!("partition {} does not start where its predecessor ends", partition.index),
                    ));
                }
            } else {
                if let Some(prev) = previous {
                    if !prev.boundary.is_last() {
                        return Err(invalid(&prev.entity_type, format!("partition {} is not open above", prev.index)));
                    }
                }
                if seen.contains(&partition.entity_type.as_str()) {
                    return Err(invalid(&partition.entity_type, "partitions are not contiguous".to_string()));
                }
                if !partition.boundary.is_first() {
                    return Err(invalid(
                        &partition.entity_type,
                        format!("partition {} is not open below", partition.index),
                    ));
                }
                seen.push(&partition.entity_type);
            }
            previous = Some(partition);
        }

        if let Some(last) = previous {
            if !last.boundary.is_last() {
                return Err(invalid(&last.entity_type, format!("partition {} is not open above", last.index)));
            }
        }
        Ok(())
    }
}

/// Cuts to place in one entity type: `cuts` cut-points every `capacity` rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CutPlan {
    cuts: usize,
    capacity: u64,
}

/// Computes [`PartitionPlan`]s against an [`EntityCatalog`]
pub struct PartitionPlanner {
    catalog: Arc<dyn EntityCatalog>,
    filters: FilterSet,
    fetch_size: usize,
}

impl PartitionPlanner {
    pub fn new(catalog: Arc<dyn EntityCatalog>) -> Self {
        Self {
            catalog,
            filters: FilterSet::default(),
            fetch_size: DEFAULT_FETCH_SIZE,
        }
    }

    pub fn with_filters(mut self, filters: FilterSet) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    /// Balanced plan of `partitions * threads` units plus one trailing partition per
    /// entity type
    pub async fn plan(
        &self,
        entity_types: &[String],
        partitions: usize,
        threads: usize,
    ) -> Result<PartitionPlan, PlanningError> {
        self.plan_with(entity_types, PartitionStrategy::Balanced { partitions, threads })
            .await
    }

    pub async fn plan_with(
        &self,
        entity_types: &[String],
        strategy: PartitionStrategy,
    ) -> Result<PartitionPlan, PlanningError> {
        strategy.validate()?;
        if entity_types.is_empty() {
            return Err(PlanningError::NoEntityTypes);
        }

        let mut names = entity_types.to_vec();
        names.sort();
        names.dedup();

        let mut descriptors = Vec::with_capacity(names.len());
        for name in &names {
            descriptors.push(self.describe(name).await?);
        }

        let cut_plans = cut_plans(&descriptors, strategy);

        let mut partitions = Vec::new();
        for descriptor in &descriptors {
            let cut_plan = cut_plans.get(&descriptor.name).copied().unwrap_or(CutPlan {
                cuts: 0,
                capacity: 0,
            });
            let cuts = if cut_plan.cuts == 0 {
                Vec::new()
            } else {
                self.cut_points(descriptor, cut_plan).await?
            };

            let mut lower: Option<EntityId> = None;
            for upper in cuts.into_iter().map(Some).chain(std::iter::once(None)) {
                let boundary = PartitionBoundary::new(lower.clone(), upper.clone()).map_err(|e| {
                    PlanningError::InvalidCover {
                        entity_type: descriptor.name.clone(),
                        reason: e.to_string(),
                    }
                })?;
                let spec = PartitionSpec {
                    index: partitions.len(),
                    entity_type: descriptor.name.clone(),
                    boundary,
                };
                debug!(
                    partition_index = spec.index,
                    entity_type = %spec.entity_type,
                    boundary = %spec.boundary,
                    "Planned partition"
                );
                partitions.push(spec);
                lower = upper;
            }
        }

        let plan = PartitionPlan {
            total_rows: descriptors.iter().map(|d| d.row_count).sum(),
            partitions,
            strategy,
            entity_types: descriptors,
        };
        plan.validate_cover()?;

        info!(
            partitions = plan.len(),
            entity_types = plan.entity_types.len(),
            total_rows = plan.total_rows,
            threads = plan.threads(),
            "Partition plan computed"
        );
        Ok(plan)
    }

    async fn describe(&self, name: &str) -> Result<EntityTypeDescriptor, PlanningError> {
        let identifier = self
            .catalog
            .identifier_field(name)
            .await
            .map_err(|source| PlanningError::IdentifierUnresolved {
                entity_type: name.to_string(),
                source,
            })?;
        let row_count = self
            .catalog
            .row_count(name, &self.filters.for_entity(name))
            .await
            .map_err(|source| PlanningError::RowCount {
                entity_type: name.to_string(),
                source,
            })?;

        debug!(entity_type = name, row_count, identifier = %identifier.name, "Counted rows");
        Ok(EntityTypeDescriptor {
            name: name.to_string(),
            identifier,
            row_count,
        })
    }

    /// Walk the identifiers of one entity type and collect a cut every `capacity` rows.
    ///
    /// The scan is always closed, even when it fails part-way.
    async fn cut_points(
        &self,
        descriptor: &EntityTypeDescriptor,
        cut_plan: CutPlan,
    ) -> Result<Vec<EntityId>, PlanningError> {
        let request = ScanRequest::identifiers(&descriptor.name, descriptor.identifier.clone())
            .with_filters(self.filters.for_entity(&descriptor.name))
            .with_fetch_size(self.fetch_size);

        let mut scan = self
            .catalog
            .open_scan(request)
            .await
            .map_err(|source| PlanningError::BoundaryScan {
                entity_type: descriptor.name.clone(),
                source,
            })?;

        let mut cuts = Vec::with_capacity(cut_plan.cuts);
        let mut outcome = Ok(());
        while cuts.len() < cut_plan.cuts {
            match scan.advance(cut_plan.capacity).await {
                Ok(Some(id)) => cuts.push(id),
                Ok(None) => {
                    warn!(
                        entity_type = %descriptor.name,
                        expected = cut_plan.cuts,
                        found = cuts.len(),
                        "Boundary scan ended early; rows were removed after counting"
                    );
                    break;
                }
                Err(source) => {
                    outcome = Err(PlanningError::BoundaryScan {
                        entity_type: descriptor.name.clone(),
                        source,
                    });
                    break;
                }
            }
        }

        for failure in scan.close().await {
            warn!(
                entity_type = %descriptor.name,
                resource = failure.resource,
                error = %failure.source,
                "Failed to release boundary scan resource"
            );
        }

        outcome.map(|()| cuts)
    }
}

fn cut_plans(descriptors: &[EntityTypeDescriptor], strategy: PartitionStrategy) -> BTreeMap<String, CutPlan> {
    let mut plans = BTreeMap::new();
    match strategy {
        PartitionStrategy::Balanced { partitions, threads } => {
            let units: Vec<PartitionUnit> = descriptors
                .iter()
                .filter(|d| d.row_count > 0)
                .map(|d| PartitionUnit::new(d.name.clone(), d.row_count))
                .collect();
            let target = partitions.saturating_mul(threads);

            let mut per_entity: BTreeMap<String, usize> = BTreeMap::new();
            for unit in split_units(units, target) {
                *per_entity.entry(unit.entity_type).or_default() += 1;
            }
            for descriptor in descriptors {
                if let Some(&k) = per_entity.get(&descriptor.name) {
                    plans.insert(
                        descriptor.name.clone(),
                        CutPlan {
                            cuts: k,
                            capacity: descriptor.row_count / k as u64,
                        },
                    );
                }
            }
        }
        PartitionStrategy::RowsPerPartition { rows, .. } => {
            for descriptor in descriptors {
                plans.insert(
                    descriptor.name.clone(),
                    CutPlan {
                        cuts: usize::try_from(descriptor.row_count / rows).unwrap_or(usize::MAX),
                        capacity: rows,
                    },
                );
            }
        }
    }
    plans
}
