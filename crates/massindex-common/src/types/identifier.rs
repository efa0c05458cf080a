//! Entity identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CommonError, Result};

/// Storage representation of an identifier column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdKind {
    /// 16/32/64-bit integer keys
    Integer,
    /// Anything else (text, uuid, ...), carried as its text form
    Text,
}

impl IdKind {
    pub fn as_str(&self) -> &str {
        match self {
            IdKind::Integer => "integer",
            IdKind::Text => "text",
        }
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier value of one row.
///
/// Identifiers of a single entity type all share one [`IdKind`]. The derived ordering
/// (variant first, then value) is the column's ascending order for integer keys. Text
/// keys are ordered by the catalog in the column's native type, which may differ from
/// byte order (`numeric`, collated `text`).
/// Serialized as a bare JSON number or string so plan and checkpoint records stay
/// readable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Int(i64),
    Text(String),
}

impl EntityId {
    pub fn kind(&self) -> IdKind {
        match self {
            EntityId::Int(_) => IdKind::Integer,
            EntityId::Text(_) => IdKind::Text,
        }
    }

    /// Parse a textual identifier for a column of the given kind
    pub fn parse(kind: IdKind, raw: &str) -> Result<Self> {
        match kind {
            IdKind::Integer => raw
                .trim()
                .parse::<i64>()
                .map(EntityId::Int)
                .map_err(|e| CommonError::InvalidIdentifier(format!("{raw}: {e}"))),
            IdKind::Text => Ok(EntityId::Text(raw.to_string())),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            EntityId::Int(v) => Some(*v),
            EntityId::Text(_) => None,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Int(v) => write!(f, "{v}"),
            EntityId::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        EntityId::Int(value)
    }
}

impl From<i32> for EntityId {
    fn from(value: i32) -> Self {
        EntityId::Int(i64::from(value))
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        EntityId::Text(value)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        EntityId::Text(value.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_by_kind() {
        assert_eq!(EntityId::parse(IdKind::Integer, " 42 ").unwrap(), EntityId::Int(42));
        assert_eq!(
            EntityId::parse(IdKind::Text, "abc").unwrap(),
            EntityId::Text("abc".to_string())
        );
        assert!(EntityId::parse(IdKind::Integer, "4x2").is_err());
    }

    #[test]
    fn test_serializes_as_bare_value() {
        assert_eq!(serde_json::to_string(&EntityId::Int(7)).unwrap(), "7");
        assert_eq!(serde_json::to_string(&EntityId::from("k-1")).unwrap(), "\"k-1\"");

        let back: EntityId = serde_json::from_str("1000").unwrap();
        assert_eq!(back, EntityId::Int(1000));
        let back: EntityId = serde_json::from_str("\"uuid-ish\"").unwrap();
        assert_eq!(back, EntityId::from("uuid-ish"));
    }

    #[test]
    fn test_ordering_within_kind() {
        assert!(EntityId::Int(-5) < EntityId::Int(3));
        assert!(EntityId::from("a") < EntityId::from("b"));
    }
}
