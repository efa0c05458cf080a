//! In-process catalog
//!
//! Tables live in memory behind a lock so rows can be inserted or deleted while a job
//! is running. Each scan snapshots the matching rows when it is opened, like a
//! repeatable-read transaction would.
//!
//! Fault injection hooks (`fail_reads_after`, `fail_release_of`, ...) exist so tests can
//! exercise scan failures and resource release failures.

use async_trait::async_trait;
use massindex_common::types::{EntityId, FilterPredicate, IdKind, IdentifierField};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use super::{EntityCatalog, OrderedScan, ScanProjection, ScanRequest, ScannedRow};
use crate::error::{CatalogError, ResourceReleaseError};

/// Resource names reported by [`MemoryScan::close`]
pub const CURSOR_RESOURCE: &str = "cursor";
pub const SESSION_RESOURCE: &str = "session";

#[derive(Debug, Clone)]
struct MemoryTable {
    identifier: IdentifierField,
    rows: BTreeMap<EntityId, Value>,
}

#[derive(Debug, Default)]
struct Faults {
    /// entity type -> rows a scan may return before failing
    read_failures: HashMap<String, u64>,
    row_count_failures: HashSet<String>,
    release_failures: HashSet<&'static str>,
}

#[derive(Debug, Default)]
struct CatalogState {
    tables: HashMap<String, MemoryTable>,
    faults: Faults,
}

/// Thread-safe in-memory [`EntityCatalog`]
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<CatalogState>>,
    open_resources: Arc<AtomicUsize>,
    scans_opened: Arc<AtomicUsize>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type with its identifier field
    pub fn with_table(self, entity_type: impl Into<String>, identifier: IdentifierField) -> Self {
        self.write_state(|state| {
            state.tables.insert(
                entity_type.into(),
                MemoryTable {
                    identifier,
                    rows: BTreeMap::new(),
                },
            );
        });
        self
    }

    /// Register an entity type with integer ids `1..=rows` and a small document per row
    pub fn with_sequential_rows(self, entity_type: &str, rows: i64) -> Self {
        let catalog = self.with_table(entity_type, IdentifierField::integer("id"));
        for id in 1..=rows {
            catalog.insert(entity_type, EntityId::Int(id), serde_json::json!({ "id": id }));
        }
        catalog
    }

    /// Insert or replace a row. Unknown entity types are ignored.
    pub fn insert(&self, entity_type: &str, id: EntityId, document: Value) {
        self.write_state(|state| {
            if let Some(table) = state.tables.get_mut(entity_type) {
                table.rows.insert(id, document);
            }
        });
    }

    pub fn delete(&self, entity_type: &str, id: &EntityId) {
        self.write_state(|state| {
            if let Some(table) = state.tables.get_mut(entity_type) {
                table.rows.remove(id);
            }
        });
    }

    /// Scans of `entity_type` fail after returning `rows` rows
    pub fn fail_reads_after(&self, entity_type: &str, rows: u64) {
        self.write_state(|state| {
            state.faults.read_failures.insert(entity_type.to_string(), rows);
        });
    }

    pub fn fail_row_count(&self, entity_type: &str) {
        self.write_state(|state| {
            state.faults.row_count_failures.insert(entity_type.to_string());
        });
    }

    /// Releasing the named resource (see [`CURSOR_RESOURCE`]) fails on close
    pub fn fail_release_of(&self, resource: &'static str) {
        self.write_state(|state| {
            state.faults.release_failures.insert(resource);
        });
    }

    pub fn clear_faults(&self) {
        self.write_state(|state| state.faults = Faults::default());
    }

    /// Resources (cursors and sessions) currently held by open scans
    pub fn open_resources(&self) -> usize {
        self.open_resources.load(Ordering::SeqCst)
    }

    pub fn scans_opened(&self) -> usize {
        self.scans_opened.load(Ordering::SeqCst)
    }

    fn write_state(&self, f: impl FnOnce(&mut CatalogState)) {
        let mut guard = self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard);
    }

    fn read_state<T>(&self, f: impl FnOnce(&CatalogState) -> T) -> T {
        let guard = self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    }
}

fn matches_all(filters: &[FilterPredicate], document: &Value) -> Result<bool, CatalogError> {
    for filter in filters {
        match filter.matches(document) {
            Some(true) => {}
            Some(false) => return Ok(false),
            None => return Err(CatalogError::UnsupportedPredicate(filter.to_string())),
        }
    }
    Ok(true)
}

fn check_kind(entity_type: &str, table: &MemoryTable, bound: Option<&EntityId>) -> Result<(), CatalogError> {
    match bound {
        Some(id) if id.kind() != table.identifier.kind => Err(CatalogError::IdentifierMismatch {
            entity_type: entity_type.to_string(),
            reason: format!("bound {id} is not of kind {}", table.identifier.kind),
        }),
        _ => Ok(()),
    }
}

#[async_trait]
impl EntityCatalog for InMemoryCatalog {
    async fn identifier_field(&self, entity_type: &str) -> Result<IdentifierField, CatalogError> {
        self.read_state(|state| {
            state
                .tables
                .get(entity_type)
                .map(|t| t.identifier.clone())
                .ok_or_else(|| CatalogError::UnknownEntityType(entity_type.to_string()))
        })
    }

    async fn row_count(&self, entity_type: &str, filters: &[FilterPredicate]) -> Result<u64, CatalogError> {
        self.read_state(|state| {
            if state.faults.row_count_failures.contains(entity_type) {
                return Err(CatalogError::Backend(format!("row count of {entity_type} refused")));
            }
            let table = state
                .tables
                .get(entity_type)
                .ok_or_else(|| CatalogError::UnknownEntityType(entity_type.to_string()))?;

            let mut count = 0u64;
            for document in table.rows.values() {
                if matches_all(filters, document)? {
                    count += 1;
                }
            }
            Ok(count)
        })
    }

    async fn open_scan(&self, request: ScanRequest) -> Result<Box<dyn OrderedScan>, CatalogError> {
        let (rows, fail_after) = self.read_state(|state| {
            let table = state
                .tables
                .get(&request.entity_type)
                .ok_or_else(|| CatalogError::UnknownEntityType(request.entity_type.clone()))?;
            check_kind(&request.entity_type, table, request.lower.as_ref())?;
            check_kind(&request.entity_type, table, request.upper.as_ref())?;

            let mut rows = VecDeque::new();
            for (id, document) in &table.rows {
                let above_lower = request.lower.as_ref().is_none_or(|lower| id >= lower);
                let below_upper = request.upper.as_ref().is_none_or(|upper| id < upper);
                if !(above_lower && below_upper) || !matches_all(&request.filters, document)? {
                    continue;
                }
                let document = match request.projection {
                    ScanProjection::Entities => document.clone(),
                    ScanProjection::Identifiers => Value::Null,
                };
                rows.push_back(ScannedRow {
                    id: id.clone(),
                    document,
                });
                if request.max_results.is_some_and(|max| rows.len() as u64 >= max) {
                    break;
                }
            }
            let fail_after = state.faults.read_failures.get(&request.entity_type).copied();
            Ok::<_, CatalogError>((rows, fail_after))
        })?;

        // cursor + session
        self.open_resources.fetch_add(2, Ordering::SeqCst);
        self.scans_opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryScan {
            entity_type: request.entity_type,
            kind: request.identifier.kind,
            rows,
            returned: 0,
            fail_after,
            catalog: self.clone(),
            cursor_open: true,
            session_open: true,
        }))
    }
}

/// Scan over a snapshot of an in-memory table
pub struct MemoryScan {
    entity_type: String,
    kind: IdKind,
    rows: VecDeque<ScannedRow>,
    returned: u64,
    fail_after: Option<u64>,
    catalog: InMemoryCatalog,
    cursor_open: bool,
    session_open: bool,
}

impl MemoryScan {
    fn ensure_readable(&self) -> Result<(), CatalogError> {
        if !self.cursor_open {
            return Err(CatalogError::ScanClosed);
        }
        if self.fail_after.is_some_and(|limit| self.returned >= limit) {
            return Err(CatalogError::Backend(format!(
                "injected read failure on {} after {} rows",
                self.entity_type, self.returned
            )));
        }
        Ok(())
    }

    fn release(&mut self, resource: &'static str) -> Option<ResourceReleaseError> {
        self.catalog.open_resources.fetch_sub(1, Ordering::SeqCst);
        let failing = self
            .catalog
            .read_state(|state| state.faults.release_failures.contains(resource));
        failing.then(|| {
            ResourceReleaseError::new(
                resource,
                CatalogError::Backend(format!("injected failure releasing {resource}")),
            )
        })
    }
}

#[async_trait]
impl OrderedScan for MemoryScan {
    async fn next(&mut self) -> Result<Option<ScannedRow>, CatalogError> {
        self.ensure_readable()?;
        let row = self.rows.pop_front();
        if let Some(ref r) = row {
            debug_assert_eq!(r.id.kind(), self.kind);
            self.returned += 1;
        }
        Ok(row)
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
        let mut failures = Vec::new();
        if self.cursor_open {
            self.cursor_open = false;
            self.rows.clear();
            failures.extend(self.release(CURSOR_RESOURCE));
        }
        if self.session_open {
            self.session_open = false;
            failures.extend(self.release(SESSION_RESOURCE));
        }
        failures
    }
}
