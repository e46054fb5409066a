use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;

/// Abstract query filter handed to a [`DatabaseHandler`](crate::DatabaseHandler).
///
/// Drivers translate it into their native query language; the in-memory
/// driver evaluates it with [`QueryFilter::matches`].
#[derive(Clone, Debug, PartialEq)]
pub enum QueryFilter {
    /// Matches every document.
    All,
    /// Field equals value, or field is an array containing value.
    Eq { field: String, value: Value },
    /// Field equals any of the values.
    In { field: String, values: Vec<Value> },
    /// Field presence (`exists = true`) or absence.
    Exists { field: String, exists: bool },
    /// Every sub-filter matches.
    And(Vec<QueryFilter>),
}

impl QueryFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::Exists {
            field: field.into(),
            exists: true,
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::Exists {
            field: field.into(),
            exists: false,
        }
    }

    /// Conjunction, flattening nested `And`s and dropping `All`.
    pub fn and(self, other: QueryFilter) -> Self {
        let mut parts = Vec::new();
        for f in [self, other] {
            match f {
                Self::All => {}
                Self::And(inner) => parts.extend(inner),
                f => parts.push(f),
            }
        }
        match parts.len() {
            0 => Self::All,
            1 => parts.remove(0),
            _ => Self::And(parts),
        }
    }

    /// Evaluate against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::All => true,
            Self::Eq { field, value } => doc.get(field).is_some_and(|v| value_matches(v, value)),
            Self::In { field, values } => doc
                .get(field)
                .is_some_and(|v| values.iter().any(|want| value_matches(v, want))),
            Self::Exists { field, exists } => doc.contains(field) == *exists,
            Self::And(parts) => parts.iter().all(|p| p.matches(doc)),
        }
    }
}

fn value_matches(actual: &Value, wanted: &Value) -> bool {
    match actual {
        Value::Array(items) if !wanted.is_array() => items.contains(wanted),
        _ => actual == wanted,
    }
}

/// Ordering between two field values for sorted lookups.
///
/// Numbers compare numerically, strings lexically; a missing value sorts
/// before any present one.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// Index key direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    fn as_i8(self) -> i8 {
        match self {
            Self::Ascending => 1,
            Self::Descending => -1,
        }
    }
}

/// A compound index definition.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    pub keys: Vec<(String, SortOrder)>,
}

impl IndexSpec {
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    pub fn ascending(mut self, field: impl Into<String>) -> Self {
        self.keys.push((field.into(), SortOrder::Ascending));
        self
    }

    pub fn descending(mut self, field: impl Into<String>) -> Self {
        self.keys.push((field.into(), SortOrder::Descending));
        self
    }

    /// Canonical name, e.g. `rev_id_1_shared_id_1_type_1`.
    pub fn name(&self) -> String {
        self.keys
            .iter()
            .map(|(field, order)| format!("{field}_{}", order.as_i8()))
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl Default for IndexSpec {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Document {
        Document::from_value(json!({
            "_id": "n1",
            "type": "mesh",
            "parents": ["p1", "p2"],
            "meta": {"level": 2},
        }))
        .unwrap()
    }

    #[test]
    fn eq_matches_scalars_and_array_members() {
        let d = doc();
        assert!(QueryFilter::eq("type", "mesh").matches(&d));
        assert!(!QueryFilter::eq("type", "material").matches(&d));
        assert!(QueryFilter::eq("parents", "p2").matches(&d));
        assert!(QueryFilter::eq("meta.level", 2).matches(&d));
    }

    #[test]
    fn in_and_exists() {
        let d = doc();
        assert!(QueryFilter::is_in("_id", ["x", "n1"]).matches(&d));
        assert!(!QueryFilter::is_in("_id", ["x"]).matches(&d));
        assert!(QueryFilter::exists("parents").matches(&d));
        assert!(QueryFilter::missing("incomplete").matches(&d));
        assert!(!QueryFilter::missing("type").matches(&d));
    }

    #[test]
    fn and_flattens_and_drops_all() {
        let f = QueryFilter::All
            .and(QueryFilter::eq("a", 1))
            .and(QueryFilter::eq("b", 2).and(QueryFilter::eq("c", 3)));
        match &f {
            QueryFilter::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(QueryFilter::All.and(QueryFilter::All), QueryFilter::All);
        assert_eq!(QueryFilter::All.and(QueryFilter::eq("a", 1)), QueryFilter::eq("a", 1));
    }

    #[test]
    fn and_requires_every_part() {
        let d = doc();
        assert!(QueryFilter::eq("type", "mesh").and(QueryFilter::exists("meta")).matches(&d));
        assert!(!QueryFilter::eq("type", "mesh").and(QueryFilter::exists("nope")).matches(&d));
    }

    #[test]
    fn compare_values_orders_numbers_and_missing() {
        let (a, b) = (json!(1), json!(10));
        assert_eq!(compare_values(Some(&a), Some(&b)), Ordering::Less);
        assert_eq!(compare_values(None, Some(&a)), Ordering::Less);
        assert_eq!(compare_values(Some(&json!("b")), Some(&json!("a"))), Ordering::Greater);
    }

    #[test]
    fn index_name_is_canonical() {
        let spec = IndexSpec::new().ascending("rev_id").ascending("shared_id").ascending("type");
        assert_eq!(spec.name(), "rev_id_1_shared_id_1_type_1");
        assert_eq!(IndexSpec::new().descending("timestamp").to_string(), "timestamp_-1");
    }
}
