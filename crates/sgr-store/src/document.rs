use std::collections::BTreeMap;

use serde_json::{Map, Value};
use sgr_types::RepoUuid;

use crate::error::{StoreError, StoreResult};

/// Name of the primary key field.
pub const ID_FIELD: &str = "_id";

/// A schema-flexible document plus its in-memory binary fields.
///
/// Fields are a JSON object. Binary fields (vertex buffers, texture data)
/// travel alongside in a separate mapping and are never serialized with the
/// fields; they must be externalized before the document is written.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    fields: Map<String, Value>,
    binaries: BTreeMap<String, Vec<u8>>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing field map.
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            binaries: BTreeMap::new(),
        }
    }

    /// Wrap a JSON value, which must be an object.
    pub fn from_value(value: Value) -> StoreResult<Self> {
        match value {
            Value::Object(fields) => Ok(Self::from_map(fields)),
            other => Err(StoreError::Malformed {
                field: ID_FIELD.into(),
                reason: format!("expected an object, got {other}"),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Fields
    // -----------------------------------------------------------------------

    /// Look up a field. Dotted paths descend into sub-documents.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Set a top-level field, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    /// Builder-style [`Document::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    /// Number of top-level fields (binaries excluded).
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.binaries.is_empty()
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(Value::as_u64)
    }

    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(Value::as_i64)
    }

    /// A sub-document field as its own [`Document`].
    pub fn get_document(&self, path: &str) -> Option<Document> {
        self.get(path)
            .and_then(Value::as_object)
            .map(|m| Document::from_map(m.clone()))
    }

    /// A uuid stored in string form. Absent fields are `Ok(None)`.
    pub fn get_uuid(&self, path: &str) -> StoreResult<Option<RepoUuid>> {
        match self.get(path) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => RepoUuid::parse(s).map(Some).map_err(|e| {
                StoreError::Malformed {
                    field: path.into(),
                    reason: e.to_string(),
                }
            }),
            Some(other) => Err(StoreError::Malformed {
                field: path.into(),
                reason: format!("expected uuid string, got {other}"),
            }),
        }
    }

    /// An array of uuids. Absent fields yield an empty vector.
    pub fn get_uuid_array(&self, path: &str) -> StoreResult<Vec<RepoUuid>> {
        let Some(value) = self.get(path) else {
            return Ok(Vec::new());
        };
        let items = value.as_array().ok_or_else(|| StoreError::Malformed {
            field: path.into(),
            reason: "expected an array".into(),
        })?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .and_then(|s| RepoUuid::parse(s).ok())
                    .ok_or_else(|| StoreError::Malformed {
                        field: path.into(),
                        reason: format!("invalid uuid element {item}"),
                    })
            })
            .collect()
    }

    /// An array of strings. Absent fields yield an empty vector.
    pub fn get_str_array(&self, path: &str) -> Vec<String> {
        self.get(path)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The `_id` in canonical string form, if present.
    pub fn id_key(&self) -> Option<String> {
        match self.fields.get(ID_FIELD)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    // -----------------------------------------------------------------------
    // Binaries
    // -----------------------------------------------------------------------

    /// Attach an in-memory binary field.
    pub fn set_binary(&mut self, name: impl Into<String>, data: Vec<u8>) {
        self.binaries.insert(name.into(), data);
    }

    pub fn binary(&self, name: &str) -> Option<&[u8]> {
        self.binaries.get(name).map(Vec::as_slice)
    }

    pub fn binaries(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.binaries
    }

    pub fn has_binaries(&self) -> bool {
        !self.binaries.is_empty()
    }

    /// Detach and return all binary fields.
    pub fn take_binaries(&mut self) -> BTreeMap<String, Vec<u8>> {
        std::mem::take(&mut self.binaries)
    }

    /// Total bytes across all binary fields.
    pub fn binary_bytes(&self) -> usize {
        self.binaries.values().map(Vec::len).sum()
    }

    /// Approximate wire size: serialized fields plus attached binaries.
    pub fn size_estimate(&self) -> usize {
        let fields = serde_json::to_vec(&self.fields).map(|v| v.len()).unwrap_or(0);
        fields + self.binary_bytes()
    }

    /// The fields as a JSON value (binaries excluded).
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

impl From<Map<String, Value>> for Document {
    fn from(fields: Map<String, Value>) -> Self {
        Self::from_map(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Document {
        Document::from_value(json!({
            "_id": "abc",
            "name": "wall",
            "count": 3,
            "nested": {"inner": {"leaf": 7}},
            "tags": ["a", "b"],
        }))
        .unwrap()
    }

    #[test]
    fn dotted_paths_descend() {
        let doc = sample();
        assert_eq!(doc.get_u64("nested.inner.leaf"), Some(7));
        assert!(doc.get("nested.missing").is_none());
        assert!(doc.get("name.sub").is_none());
    }

    #[test]
    fn typed_accessors() {
        let doc = sample();
        assert_eq!(doc.get_str("name"), Some("wall"));
        assert_eq!(doc.get_i64("count"), Some(3));
        assert_eq!(doc.get_str_array("tags"), vec!["a", "b"]);
        assert_eq!(doc.id_key().as_deref(), Some("abc"));
    }

    #[test]
    fn from_value_rejects_non_objects() {
        assert!(Document::from_value(json!([1, 2])).is_err());
    }

    #[test]
    fn uuid_fields_parse() {
        let id = RepoUuid::new();
        let doc = Document::new()
            .with("one", id.to_string())
            .with("many", json!([id.to_string(), id.to_string()]));
        assert_eq!(doc.get_uuid("one").unwrap(), Some(id));
        assert_eq!(doc.get_uuid("absent").unwrap(), None);
        assert_eq!(doc.get_uuid_array("many").unwrap(), vec![id, id]);
        assert!(doc.get_uuid_array("absent").unwrap().is_empty());
    }

    #[test]
    fn malformed_uuid_is_an_error() {
        let doc = Document::new().with("one", "nope").with("many", json!([1]));
        assert!(matches!(doc.get_uuid("one"), Err(StoreError::Malformed { .. })));
        assert!(matches!(doc.get_uuid_array("many"), Err(StoreError::Malformed { .. })));
    }

    #[test]
    fn numeric_id_key_is_stringified() {
        let doc = Document::new().with(ID_FIELD, 42);
        assert_eq!(doc.id_key().as_deref(), Some("42"));
        assert_eq!(Document::new().id_key(), None);
    }

    #[test]
    fn binaries_are_separate_from_fields() {
        let mut doc = Document::new().with("a", 1);
        doc.set_binary("vertices", vec![1, 2, 3]);
        assert_eq!(doc.len(), 1);
        assert!(doc.has_binaries());
        assert_eq!(doc.binary("vertices"), Some(&[1u8, 2, 3][..]));
        assert!(!doc.to_value().as_object().unwrap().contains_key("vertices"));

        let taken = doc.take_binaries();
        assert_eq!(taken.len(), 1);
        assert!(!doc.has_binaries());
    }

    #[test]
    fn size_estimate_counts_binaries() {
        let mut doc = Document::new().with("a", 1);
        let base = doc.size_estimate();
        doc.set_binary("b", vec![0; 100]);
        assert_eq!(doc.size_estimate(), base + 100);
    }
}
