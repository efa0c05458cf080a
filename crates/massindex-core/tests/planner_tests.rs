//! Partition planning against the in-memory catalog

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use massindex_common::types::{CompareOp, EntityId, FilterPredicate, FilterSet, IdentifierField};
use massindex_core::catalog::{InMemoryCatalog, ScannedRow};
use massindex_core::error::{CatalogError, PlanningError, ResourceReleaseError};
use massindex_core::{EntityCatalog, OrderedScan, ScanRequest};
use massindex_core::planner::{split_units, PartitionUnit};
use massindex_core::{PartitionPlan, PartitionPlanner, PartitionStrategy};
use proptest::prelude::*;
use std::collections::VecDeque;
use std::sync::Arc;

fn names(entity_types: &[&str]) -> Vec<String> {
    entity_types.iter().map(|s| s.to_string()).collect()
}

fn bounds(plan: &PartitionPlan, entity_type: &str) -> Vec<(Option<i64>, Option<i64>)> {
    plan.for_entity(entity_type)
        .map(|p| {
            (
                p.boundary.lower_bound.as_ref().and_then(EntityId::as_int),
                p.boundary.upper_bound.as_ref().and_then(EntityId::as_int),
            )
        })
        .collect()
}

fn company_and_employees() -> InMemoryCatalog {
    InMemoryCatalog::new()
        .with_sequential_rows("Company", 5)
        .with_sequential_rows("Employee", 4500)
}

#[tokio::test]
async fn test_rows_per_partition_plan() {
    let planner = PartitionPlanner::new(Arc::new(company_and_employees()));
    let plan = planner
        .plan_with(
            &names(&["Employee", "Company"]),
            PartitionStrategy::RowsPerPartition { rows: 1000, threads: 1 },
        )
        .await
        .unwrap();

    assert_eq!(plan.len(), 6);
    assert_eq!(plan.total_rows, 4505);
    assert_eq!(bounds(&plan, "Company"), vec![(None, None)]);
    assert_eq!(
        bounds(&plan, "Employee"),
        vec![
            (None, Some(1000)),
            (Some(1000), Some(2000)),
            (Some(2000), Some(3000)),
            (Some(3000), Some(4000)),
            (Some(4000), None),
        ]
    );

    // Indices are dense and follow entity name order
    let indices: Vec<usize> = plan.partitions.iter().map(|p| p.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(plan.partitions[0].entity_type, "Company");
}

#[tokio::test]
async fn test_balanced_plan_has_units_plus_trailing_partitions() {
    let catalog = InMemoryCatalog::new()
        .with_sequential_rows("Company", 100)
        .with_sequential_rows("Employee", 4500);
    let planner = PartitionPlanner::new(Arc::new(catalog));
    let plan = planner.plan(&names(&["Company", "Employee"]), 2, 2).await.unwrap();

    // 4 units (Company 100, Employee 2250 + 1125 + 1125) and one trailing partition each
    assert_eq!(plan.len(), 4 + 2);
    assert_eq!(bounds(&plan, "Company"), vec![(None, Some(100)), (Some(100), None)]);
    assert_eq!(
        bounds(&plan, "Employee"),
        vec![
            (None, Some(1500)),
            (Some(1500), Some(3000)),
            (Some(3000), Some(4500)),
            (Some(4500), None),
        ]
    );
    assert_eq!(plan.threads(), 2);
    assert_eq!(plan.requested_partitions(), Some(2));
    plan.validate_cover().unwrap();
}

#[tokio::test]
async fn test_empty_entity_type_gets_one_unbounded_partition() {
    let catalog = InMemoryCatalog::new()
        .with_table("Address", IdentifierField::integer("id"))
        .with_sequential_rows("Employee", 10);
    let planner = PartitionPlanner::new(Arc::new(catalog));
    let plan = planner.plan(&names(&["Address", "Employee"]), 1, 2).await.unwrap();

    assert_eq!(bounds(&plan, "Address"), vec![(None, None)]);
    assert_eq!(
        bounds(&plan, "Employee"),
        vec![(None, Some(5)), (Some(5), Some(10)), (Some(10), None)]
    );
    assert_eq!(plan.entity_type("Address").unwrap().row_count, 0);
}

#[tokio::test]
async fn test_filters_shape_counts_and_cuts() {
    let catalog = InMemoryCatalog::new().with_table("Employee", IdentifierField::integer("id"));
    for id in 1..=20i64 {
        catalog.insert(
            "Employee",
            EntityId::Int(id),
            serde_json::json!({ "id": id, "active": id % 2 == 0 }),
        );
    }
    let filters = FilterSet::new().with_entity("Employee", FilterPredicate::equals("active", true));
    let planner = PartitionPlanner::new(Arc::new(catalog)).with_filters(filters);
    let plan = planner.plan(&names(&["Employee"]), 1, 2).await.unwrap();

    assert_eq!(plan.entity_type("Employee").unwrap().row_count, 10);
    assert_eq!(
        bounds(&plan, "Employee"),
        vec![(None, Some(10)), (Some(10), Some(20)), (Some(20), None)]
    );
}

#[tokio::test]
async fn test_duplicate_entity_types_are_planned_once() {
    let planner = PartitionPlanner::new(Arc::new(company_and_employees()));
    let plan = planner
        .plan(&names(&["Company", "Company", "Company"]), 1, 1)
        .await
        .unwrap();
    assert_eq!(plan.entity_types.len(), 1);
    assert_eq!(plan.len(), 2);
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let planner = PartitionPlanner::new(Arc::new(company_and_employees()));

    assert!(matches!(
        planner.plan(&[], 1, 1).await,
        Err(PlanningError::NoEntityTypes)
    ));
    assert!(matches!(
        planner.plan(&names(&["Employee"]), 0, 1).await,
        Err(PlanningError::InvalidParameters(_))
    ));
    assert!(matches!(
        planner.plan(&names(&["Employee"]), 1, 0).await,
        Err(PlanningError::InvalidParameters(_))
    ));
    assert!(matches!(
        planner
            .plan_with(&names(&["Employee"]), PartitionStrategy::RowsPerPartition { rows: 0, threads: 1 })
            .await,
        Err(PlanningError::InvalidParameters(_))
    ));
    assert!(matches!(
        planner.plan(&names(&["Invoice"]), 1, 1).await,
        Err(PlanningError::IdentifierUnresolved { entity_type, .. }) if entity_type == "Invoice"
    ));
}

#[tokio::test]
async fn test_catalog_failures_abort_planning() {
    let catalog = company_and_employees();
    catalog.fail_row_count("Company");
    let planner = PartitionPlanner::new(Arc::new(catalog.clone()));
    assert!(matches!(
        planner.plan(&names(&["Company", "Employee"]), 1, 1).await,
        Err(PlanningError::RowCount { entity_type, .. }) if entity_type == "Company"
    ));

    catalog.clear_faults();
    catalog.fail_reads_after("Employee", 3);
    assert!(matches!(
        planner.plan(&names(&["Employee"]), 1, 1).await,
        Err(PlanningError::BoundaryScan { entity_type, .. }) if entity_type == "Employee"
    ));
    // The failed boundary scan was still closed
    assert_eq!(catalog.open_resources(), 0);
}

#[tokio::test]
async fn test_boundary_scans_release_their_resources() {
    let catalog = company_and_employees();
    let planner = PartitionPlanner::new(Arc::new(catalog.clone())).with_fetch_size(64);
    planner.plan(&names(&["Company", "Employee"]), 3, 2).await.unwrap();
    assert!(catalog.scans_opened() >= 2);
    assert_eq!(catalog.open_resources(), 0);
}

#[tokio::test]
async fn test_range_filter_applies_to_every_entity_type() {
    let filters = FilterSet::new().with_global(FilterPredicate::compare("id", CompareOp::Gt, 2));
    let planner = PartitionPlanner::new(Arc::new(company_and_employees())).with_filters(filters);
    let plan = planner
        .plan_with(
            &names(&["Company", "Employee"]),
            PartitionStrategy::RowsPerPartition { rows: 1000, threads: 1 },
        )
        .await
        .unwrap();

    assert_eq!(plan.entity_type("Company").unwrap().row_count, 3);
    assert_eq!(plan.entity_type("Employee").unwrap().row_count, 4498);
    // The 1000th matching employee is id 1002
    assert_eq!(bounds(&plan, "Employee")[0], (None, Some(1002)));
}

/// A `numeric` key: identifiers travel as text but sort by value, as Postgres returns them
struct NumericKeyCatalog {
    rows: i64,
}

struct NumericKeyScan {
    ids: VecDeque<i64>,
}

#[async_trait]
impl OrderedScan for NumericKeyScan {
    async fn next(&mut self) -> Result<Option<ScannedRow>, CatalogError> {
        Ok(self.ids.pop_front().map(|id| ScannedRow {
            id: EntityId::Text(id.to_string()),
            document: serde_json::Value::Null,
        }))
    }

    async fn advance(&mut self, rows: u64) -> Result<Option<EntityId>, CatalogError> {
        let mut landed = None;
        for _ in 0..rows {
            match self.next().await? {
                Some(row) => landed = Some(row.id),
                None => return Ok(None),
            }
        }
        Ok(landed)
    }

    async fn close(&mut self) -> Vec<ResourceReleaseError> {
        self.ids.clear();
        Vec::new()
    }
}

#[async_trait]
impl EntityCatalog for NumericKeyCatalog {
    async fn identifier_field(&self, _entity_type: &str) -> Result<IdentifierField, CatalogError> {
        Ok(IdentifierField::text("id"))
    }

    async fn row_count(&self, _entity_type: &str, _filters: &[FilterPredicate]) -> Result<u64, CatalogError> {
        Ok(self.rows as u64)
    }

    async fn open_scan(&self, _request: ScanRequest) -> Result<Box<dyn OrderedScan>, CatalogError> {
        Ok(Box::new(NumericKeyScan {
            ids: (1..=self.rows).collect(),
        }))
    }
}

fn text_bounds(plan: &PartitionPlan) -> Vec<(Option<String>, Option<String>)> {
    let render = |id: &Option<EntityId>| id.as_ref().map(EntityId::to_string);
    plan.partitions
        .iter()
        .map(|p| (render(&p.boundary.lower_bound), render(&p.boundary.upper_bound)))
        .collect()
}

#[tokio::test]
async fn test_text_identifiers_keep_catalog_order() {
    let planner = PartitionPlanner::new(Arc::new(NumericKeyCatalog { rows: 20 }));
    let plan = planner.plan(&names(&["Invoice"]), 4, 1).await.unwrap();

    let text = |s: &str| Some(s.to_string());
    assert_eq!(
        text_bounds(&plan),
        vec![
            (None, text("5")),
            (text("5"), text("10")),
            (text("10"), text("15")),
            (text("15"), text("20")),
            (text("20"), None),
        ]
    );

    // The persisted form reloads on resume
    let reloaded =
        PartitionPlan::from_records(plan.to_records(), plan.strategy, plan.entity_types.clone()).unwrap();
    assert_eq!(reloaded.partitions, plan.partitions);
}

#[test]
fn test_split_units_stops_at_single_rows() {
    let units = split_units(vec![PartitionUnit::new("Employee", 3)], 10);
    assert_eq!(units.len(), 3);
    assert!(units.iter().all(|u| u.row_count == 1));
}

fn expected_partitions(counts: &[u64], target: usize) -> usize {
    let non_empty = counts.iter().filter(|&&c| c > 0).count();
    let total: u64 = counts.iter().sum();
    let units = non_empty.max((target as u64).min(total) as usize);
    units + counts.len()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_balanced_plan_covers_every_row_once(
        counts in proptest::collection::vec(0u64..120, 1..4),
        partitions in 1usize..4,
        threads in 1usize..4,
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut catalog = InMemoryCatalog::new();
        let mut entity_types = Vec::new();
        for (i, count) in counts.iter().enumerate() {
            let name = format!("Entity{i}");
            catalog = catalog.with_sequential_rows(&name, *count as i64);
            entity_types.push(name);
        }

        let planner = PartitionPlanner::new(Arc::new(catalog));
        let plan = runtime
            .block_on(planner.plan(&entity_types, partitions, threads))
            .unwrap();

        prop_assert_eq!(plan.len(), expected_partitions(&counts, partitions * threads));
        prop_assert!(plan.validate_cover().is_ok());

        for (name, count) in entity_types.iter().zip(&counts) {
            for id in 1..=*count as i64 {
                let owners = plan
                    .for_entity(name)
                    .filter(|p| p.boundary.contains(&EntityId::Int(id)))
                    .count();
                prop_assert_eq!(owners, 1);
            }
            let specs: Vec<_> = plan.for_entity(name).collect();
            prop_assert!(specs.first().is_some_and(|p| p.boundary.is_first()));
            prop_assert!(specs.last().is_some_and(|p| p.boundary.is_last()));
        }
    }

    #[test]
    fn prop_split_keeps_row_total(count in 2u64..100_000) {
        let (left, right) = PartitionUnit::new("Employee", count).split();
        prop_assert_eq!(left.row_count + right.row_count, count);
        prop_assert!(left.row_count.abs_diff(right.row_count) <= 1);
    }
}
