//! Extra filter predicates attached to every query issued for an entity type

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CommonError;

/// Range comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// One extra restriction on the rows of an entity type.
///
/// `value` is a JSON scalar; `Equals` with `null` means "field is null".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterPredicate {
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    Equals {
        field: String,
        value: Value,
    },
    /// Backend-specific boolean expression, passed through verbatim
    Raw { expression: String },
}

impl FilterPredicate {
    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        FilterPredicate::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterPredicate::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn raw(expression: impl Into<String>) -> Self {
        FilterPredicate::Raw {
            expression: expression.into(),
        }
    }

    /// Evaluate against a JSON document.
    ///
    /// Returns `None` for [`FilterPredicate::Raw`], which only a database can evaluate.
    pub fn matches(&self, document: &Value) -> Option<bool> {
        match self {
            FilterPredicate::Compare { field, op, value } => {
                let actual = document.get(field)?;
                Some(compare_json(actual, value).is_some_and(|ord| op.accepts(ord)))
            }
            FilterPredicate::Equals { field, value } => {
                let actual = document.get(field).unwrap_or(&Value::Null);
                if value.is_null() {
                    return Some(actual.is_null());
                }
                Some(compare_json(actual, value) == Some(Ordering::Equal))
            }
            FilterPredicate::Raw { .. } => None,
        }
    }
}

fn compare_json(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

impl fmt::Display for FilterPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterPredicate::Compare { field, op, value } => {
                write!(f, "{field} {} {value}", op.as_sql())
            }
            FilterPredicate::Equals { field, value } => write!(f, "{field} = {value}"),
            FilterPredicate::Raw { expression } => write!(f, "({expression})"),
        }
    }
}

impl FromStr for FilterPredicate {
    type Err = CommonError;

    /// Parse `field<op>value` where op is one of `<=`, `>=`, `<`, `>`, `=`.
    ///
    /// The value is read as JSON when possible (`10`, `true`, `"quoted"`), otherwise
    /// taken as a plain string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| CommonError::InvalidPredicate {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let (pos, token) = ["<=", ">=", "<", ">", "="]
            .iter()
            .filter_map(|tok| s.find(tok).map(|pos| (pos, *tok)))
            .min_by_key(|(pos, tok)| (*pos, std::cmp::Reverse(tok.len())))
            .ok_or_else(|| invalid("missing operator"))?;

        let field = s[..pos].trim();
        let raw_value = s[pos + token.len()..].trim();
        if field.is_empty() {
            return Err(invalid("missing field name"));
        }
        if raw_value.is_empty() {
            return Err(invalid("missing value"));
        }

        let value = serde_json::from_str::<Value>(raw_value)
            .ok()
            .filter(|v| !v.is_array() && !v.is_object())
            .unwrap_or_else(|| Value::String(raw_value.to_string()));

        let op = match token {
            "<=" => CompareOp::Le,
            ">=" => CompareOp::Ge,
            "<" => CompareOp::Lt,
            ">" => CompareOp::Gt,
            _ => return Ok(FilterPredicate::equals(field, value)),
        };
        Ok(FilterPredicate::compare(field, op, value))
    }
}

/// Predicates applied to all entity types plus per-entity-type additions
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSet {
    #[serde(default)]
    pub global: Vec<FilterPredicate>,
    #[serde(default)]
    pub per_entity: BTreeMap<String, Vec<FilterPredicate>>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global(mut self, predicate: FilterPredicate) -> Self {
        self.global.push(predicate);
        self
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, predicate: FilterPredicate) -> Self {
        self.per_entity
            .entry(entity_type.into())
            .or_default()
            .push(predicate);
        self
    }

    /// Every predicate that applies to `entity_type`, global ones first
    pub fn for_entity(&self, entity_type: &str) -> Vec<FilterPredicate> {
        let mut predicates = self.global.clone();
        if let Some(specific) = self.per_entity.get(entity_type) {
            predicates.extend(specific.iter().cloned());
        }
        predicates
    }

    pub fn len(&self) -> usize {
        self.global.len() + self.per_entity.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_operators() {
        assert_eq!(
            "salary>=1000".parse::<FilterPredicate>().unwrap(),
            FilterPredicate::compare("salary", CompareOp::Ge, 1000)
        );
        assert_eq!(
            "age < 30".parse::<FilterPredicate>().unwrap(),
            FilterPredicate::compare("age", CompareOp::Lt, 30)
        );
        assert_eq!(
            "active=true".parse::<FilterPredicate>().unwrap(),
            FilterPredicate::equals("active", true)
        );
        assert_eq!(
            "name=Acme Corp".parse::<FilterPredicate>().unwrap(),
            FilterPredicate::equals("name", "Acme Corp")
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("salary".parse::<FilterPredicate>().is_err());
        assert!(">=10".parse::<FilterPredicate>().is_err());
        assert!("salary>=".parse::<FilterPredicate>().is_err());
    }

    #[test]
    fn test_matches_documents() {
        let doc = json!({"salary": 1500, "name": "bob", "manager": null});
        assert_eq!(FilterPredicate::compare("salary", CompareOp::Gt, 1000).matches(&doc), Some(true));
        assert_eq!(FilterPredicate::compare("salary", CompareOp::Lt, 1000).matches(&doc), Some(false));
        assert_eq!(FilterPredicate::equals("name", "bob").matches(&doc), Some(true));
        assert_eq!(FilterPredicate::equals("manager", Value::Null).matches(&doc), Some(true));
        assert_eq!(FilterPredicate::raw("salary > 10").matches(&doc), None);
    }

    #[test]
    fn test_filter_set_scoping() {
        let filters = FilterSet::new()
            .with_global(FilterPredicate::equals("deleted", false))
            .with_entity("Employee", FilterPredicate::compare("salary", CompareOp::Ge, 0));

        assert_eq!(filters.for_entity("Company").len(), 1);
        assert_eq!(filters.for_entity("Employee").len(), 2);
        assert_eq!(filters.len(), 2);
    }
}
