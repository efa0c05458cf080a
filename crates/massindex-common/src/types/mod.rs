//! Data model shared by the planner, the scan cursors and the job store

use serde::{Deserialize, Serialize};

mod boundary;
mod identifier;
mod predicate;

pub use boundary::{Checkpoint, PartitionBoundary};
pub use identifier::{EntityId, IdKind};
pub use predicate::{CompareOp, FilterPredicate, FilterSet};

/// Identifier column of an entity type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifierField {
    /// Column name
    pub name: String,
    /// How identifier values are represented in memory
    pub kind: IdKind,
    /// Native column type, used to cast textual bounds back (e.g. `uuid`)
    pub sql_type: String,
}

impl IdentifierField {
    pub fn integer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: IdKind::Integer,
            sql_type: "bigint".to_string(),
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: IdKind::Text,
            sql_type: "text".to_string(),
        }
    }
}

/// An entity type selected for indexing. Immutable once planning has filled in
/// the row count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityTypeDescriptor {
    pub name: String,
    pub identifier: IdentifierField,
    pub row_count: u64,
}

/// One partition of the plan, as exchanged with the job store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionRecord {
    pub entity_type_name: String,
    pub partition_index: usize,
    pub lower_bound: Option<EntityId>,
    pub upper_bound: Option<EntityId>,
}

impl PartitionRecord {
    pub fn boundary(&self) -> crate::Result<PartitionBoundary> {
        PartitionBoundary::new(self.lower_bound.clone(), self.upper_bound.clone())
    }
}

/// A fully materialized row handed to the indexing backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub entity_type: String,
    pub id: EntityId,
    pub document: serde_json::Value,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_record_shape() {
        let record = PartitionRecord {
            entity_type_name: "Employee".to_string(),
            partition_index: 1,
            lower_bound: None,
            upper_bound: Some(EntityId::Int(1000)),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "entityTypeName": "Employee",
                "partitionIndex": 1,
                "lowerBound": null,
                "upperBound": 1000
            })
        );
        assert!(record.boundary().unwrap().is_first());
    }
}
