//! Storage collaborator: identifier resolution, row counts and ordered scans
//!
//! The engine never talks to a database directly. Everything it needs from storage
//! goes through [`EntityCatalog`]:
//!
//! - resolve the identifier field of an entity type
//! - count rows (filters applied)
//! - open a forward-only scan ordered by identifier, bounded by `[lower, upper)`,
//!   with skip-ahead for boundary computation

use async_trait::async_trait;
use massindex_common::types::{EntityId, FilterPredicate, IdentifierField};
use serde_json::Value;

use crate::error::{CatalogError, ResourceReleaseError};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryCatalog;
pub use postgres::PgCatalog;

/// What a scan returns for each row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanProjection {
    /// Identifiers only; documents come back as `null`
    Identifiers,
    /// Identifier plus the materialized row
    Entities,
}

/// Parameters of one ordered scan
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub entity_type: String,
    pub identifier: IdentifierField,
    /// Inclusive
    pub lower: Option<EntityId>,
    /// Exclusive
    pub upper: Option<EntityId>,
    pub filters: Vec<FilterPredicate>,
    pub projection: ScanProjection,
    /// Rows fetched per round-trip
    pub fetch_size: usize,
    /// Stop after this many rows
    pub max_results: Option<u64>,
}

impl ScanRequest {
    /// Identifier-only scan over the whole range, as used by the planner
    pub fn identifiers(entity_type: impl Into<String>, identifier: IdentifierField) -> Self {
        Self {
            entity_type: entity_type.into(),
            identifier,
            lower: None,
            upper: None,
            filters: Vec::new(),
            projection: ScanProjection::Identifiers,
            fetch_size: crate::config::DEFAULT_FETCH_SIZE,
            max_results: None,
        }
    }

    pub fn with_bounds(mut self, lower: Option<EntityId>, upper: Option<EntityId>) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    pub fn with_filters(mut self, filters: Vec<FilterPredicate>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_projection(mut self, projection: ScanProjection) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    pub fn with_max_results(mut self, max_results: Option<u64>) -> Self {
        self.max_results = max_results;
        self
    }
}

/// One row returned by a scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedRow {
    pub id: EntityId,
    pub document: Value,
}

/// Forward-only cursor over rows in ascending identifier order
#[async_trait]
pub trait OrderedScan: Send {
    /// Next row, `None` once the range is exhausted
    async fn next(&mut self) -> Result<Option<ScannedRow>, CatalogError>;

    /// Move forward `rows` rows and return the identifier of the row landed on.
    ///
    /// `advance(1)` lands on the next row. Returns `None` when fewer than `rows` rows
    /// remain; the scan is then exhausted.
    async fn advance(&mut self, rows: u64) -> Result<Option<EntityId>, CatalogError>;

    /// Release every resource held by the scan.
    ///
    /// Each resource is released independently; one failure never prevents the next
    /// release. Calling `close` twice is a no-op the second time.
    async fn close(&mut self) -> Vec<ResourceReleaseError>;
}

/// Storage collaborator consulted by the planner and the scan cursors
#[async_trait]
pub trait EntityCatalog: Send + Sync {
    /// Identifier field of `entity_type`
    async fn identifier_field(&self, entity_type: &str) -> Result<IdentifierField, CatalogError>;

    /// Number of rows of `entity_type` matching `filters`
    async fn row_count(&self, entity_type: &str, filters: &[FilterPredicate]) -> Result<u64, CatalogError>;

    /// Open an ordered scan
    async fn open_scan(&self, request: ScanRequest) -> Result<Box<dyn OrderedScan>, CatalogError>;
}
