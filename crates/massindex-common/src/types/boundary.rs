//! Partition boundaries and checkpoints

use serde::{Deserialize, Serialize};
use std::fmt;

use super::identifier::EntityId;
use crate::error::{CommonError, Result};

/// Half-open identifier range `[lower, upper)` of one partition.
///
/// `None` on either side means unbounded. Both bounds set implies `lower < upper` in the
/// column's native order. Only integer bounds can be checked here; text bounds carry
/// numeric, uuid or collated keys whose order belongs to the catalog, so they are only
/// required to differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PartitionBoundary {
    pub lower_bound: Option<EntityId>,
    pub upper_bound: Option<EntityId>,
}

impl PartitionBoundary {
    pub fn new(lower_bound: Option<EntityId>, upper_bound: Option<EntityId>) -> Result<Self> {
        if let (Some(lower), Some(upper)) = (&lower_bound, &upper_bound) {
            let out_of_order = match (lower, upper) {
                (EntityId::Int(l), EntityId::Int(u)) => l >= u,
                _ => lower == upper,
            };
            if out_of_order {
                return Err(CommonError::InvalidBoundary {
                    lower: lower.to_string(),
                    upper: upper.to_string(),
                });
            }
        }
        Ok(Self {
            lower_bound,
            upper_bound,
        })
    }

    /// `(unbounded, unbounded)`, the whole identifier range
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_unbounded(&self) -> bool {
        self.lower_bound.is_none() && self.upper_bound.is_none()
    }

    pub fn is_first(&self) -> bool {
        self.lower_bound.is_none()
    }

    pub fn is_last(&self) -> bool {
        self.upper_bound.is_none()
    }

    /// Membership under the derived [`EntityId`] order, which matches the catalog's order
    /// for integer keys and for byte-ordered text keys
    pub fn contains(&self, id: &EntityId) -> bool {
        let above_lower = self.lower_bound.as_ref().is_none_or(|lower| id >= lower);
        let below_upper = self.upper_bound.as_ref().is_none_or(|upper| id < upper);
        above_lower && below_upper
    }

    /// Lower bound a scan of this partition starts from.
    ///
    /// A checkpoint wins over the planned lower bound and stays inclusive: the
    /// checkpointed row is read again after a restart.
    pub fn effective_lower<'a>(&'a self, checkpoint: Option<&'a Checkpoint>) -> Option<&'a EntityId> {
        match checkpoint {
            Some(cp) => Some(&cp.last_seen_identifier),
            None => self.lower_bound.as_ref(),
        }
    }
}

impl fmt::Display for PartitionBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |bound: &Option<EntityId>| match bound {
            Some(id) => id.to_string(),
            None => "null".to_string(),
        };
        write!(f, "[{}, {})", render(&self.lower_bound), render(&self.upper_bound))
    }
}

/// Last successfully processed identifier of a partition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub partition_index: usize,
    pub last_seen_identifier: EntityId,
}

impl Checkpoint {
    pub fn new(partition_index: usize, last_seen_identifier: EntityId) -> Self {
        Self {
            partition_index,
            last_seen_identifier,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rejects_inverted_bounds() {
        assert!(PartitionBoundary::new(Some(EntityId::Int(5)), Some(EntityId::Int(5))).is_err());
        assert!(PartitionBoundary::new(Some(EntityId::Int(6)), Some(EntityId::Int(5))).is_err());
        assert!(PartitionBoundary::new(Some(EntityId::Int(5)), None).is_ok());
    }

    #[test]
    fn test_text_bounds_follow_catalog_order() {
        // Cut-points of a numeric key come back as text in numeric order
        let b = PartitionBoundary::new(Some(EntityId::from("5")), Some(EntityId::from("10"))).unwrap();
        assert_eq!(b.to_string(), "[5, 10)");
        assert!(PartitionBoundary::new(Some(EntityId::from("7")), Some(EntityId::from("7"))).is_err());
    }

    #[test]
    fn test_contains_is_half_open() {
        let b = PartitionBoundary::new(Some(EntityId::Int(1000)), Some(EntityId::Int(2000))).unwrap();
        assert!(b.contains(&EntityId::Int(1000)));
        assert!(b.contains(&EntityId::Int(1999)));
        assert!(!b.contains(&EntityId::Int(2000)));
        assert!(!b.contains(&EntityId::Int(999)));
        assert!(PartitionBoundary::unbounded().contains(&EntityId::Int(i64::MIN)));
    }

    #[test]
    fn test_effective_lower_prefers_checkpoint() {
        let b = PartitionBoundary::new(Some(EntityId::Int(10)), None).unwrap();
        assert_eq!(b.effective_lower(None), Some(&EntityId::Int(10)));

        let cp = Checkpoint::new(3, EntityId::Int(42));
        assert_eq!(b.effective_lower(Some(&cp)), Some(&EntityId::Int(42)));
    }

    #[test]
    fn test_display() {
        let b = PartitionBoundary::new(None, Some(EntityId::Int(1000))).unwrap();
        assert_eq!(b.to_string(), "[null, 1000)");
        assert_eq!(PartitionBoundary::unbounded().to_string(), "[null, null)");
    }

    #[test]
    fn test_checkpoint_record_shape() {
        let cp = Checkpoint::new(2, EntityId::Int(1500));
        let json = serde_json::to_value(&cp).unwrap();
        assert_eq!(json, serde_json::json!({"partitionIndex": 2, "lastSeenIdentifier": 1500}));
    }

    proptest! {
        #[test]
        fn prop_adjacent_partitions_own_each_id_once(
            cut in -1_000i64..1_000,
            id in -2_000i64..2_000,
        ) {
            let below = PartitionBoundary::new(None, Some(EntityId::Int(cut))).unwrap();
            let above = PartitionBoundary::new(Some(EntityId::Int(cut)), None).unwrap();
            let id = EntityId::Int(id);
            prop_assert!(below.contains(&id) != above.contains(&id));
        }
    }
}
