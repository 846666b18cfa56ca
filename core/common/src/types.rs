//! Common types used throughout carecache.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Name of a logical collection of records (e.g. "therapists").
///
/// Names starting with `_` are reserved for store bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionName(String);

impl CollectionName {
    /// Create a new collection name.
    ///
    /// # Errors
    /// - Name is empty or contains whitespace or `/`
    /// - Name starts with the reserved `_` prefix
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Collection name cannot be empty".to_string(),
            ));
        }
        if name.starts_with('_') {
            return Err(crate::Error::InvalidInput(format!(
                "Collection name '{}' uses the reserved '_' prefix",
                name
            )));
        }
        if name.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(crate::Error::InvalidInput(format!(
                "Collection name '{}' contains whitespace or '/'",
                name
            )));
        }
        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CollectionName {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<CollectionName> for String {
    fn from(name: CollectionName) -> Self {
        name.0
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque JSON object with a mandatory `id` field.
///
/// The schema beyond `id` belongs to the remote API. Integer ids are
/// normalised to their decimal string form.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: String,
    body: Map<String, Value>,
}

impl Record {
    /// Build a record from a JSON value.
    ///
    /// # Errors
    /// - Value is not an object
    /// - `id` is missing, empty, or neither a string nor an integer
    pub fn from_value(value: Value) -> crate::Result<Self> {
        let Value::Object(body) = value else {
            return Err(crate::Error::InvalidInput(
                "Record must be a JSON object".to_string(),
            ));
        };

        let id = match body.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => n.to_string(),
            Some(_) => {
                return Err(crate::Error::InvalidInput(
                    "Record id must be a non-empty string or an integer".to_string(),
                ))
            }
            None => {
                return Err(crate::Error::InvalidInput(
                    "Record is missing an id".to_string(),
                ))
            }
        };

        Ok(Self { id, body })
    }

    /// Parse a record from JSON text.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| crate::Error::Serialization(e.to_string()))?;
        Self::from_value(value)
    }

    /// Record identifier, unique within its collection.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Look up a top-level field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    /// Borrow the full JSON object.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.body
    }

    /// Convert back into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }

    /// Serialize to compact JSON text.
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(&self.body).map_err(|e| crate::Error::Serialization(e.to_string()))
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.body.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Record::from_value(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_collection_name_creation() {
        let name = CollectionName::new("therapists").unwrap();
        assert_eq!(name.as_str(), "therapists");
    }

    #[test]
    fn test_collection_name_rejects_reserved_and_empty() {
        assert!(CollectionName::new("").is_err());
        assert!(CollectionName::new("_sync_meta").is_err());
        assert!(CollectionName::new("a b").is_err());
        assert!(CollectionName::new("a/b").is_err());
    }

    #[test]
    fn test_record_string_id() {
        let record = Record::from_value(json!({"id": "t1", "name": "Dr. Ada"})).unwrap();
        assert_eq!(record.id(), "t1");
        assert_eq!(record.get("name"), Some(&json!("Dr. Ada")));
    }

    #[test]
    fn test_record_integer_id_normalised() {
        let record = Record::from_value(json!({"id": 42})).unwrap();
        assert_eq!(record.id(), "42");
        // The original body is preserved untouched.
        assert_eq!(record.get("id"), Some(&json!(42)));
    }

    #[test]
    fn test_record_rejects_bad_shapes() {
        assert!(Record::from_value(json!([1, 2])).is_err());
        assert!(Record::from_value(json!({"name": "x"})).is_err());
        assert!(Record::from_value(json!({"id": ""})).is_err());
        assert!(Record::from_value(json!({"id": 1.5})).is_err());
        assert!(Record::from_value(json!({"id": null})).is_err());
    }

    #[test]
    fn test_record_serde_is_transparent() {
        let records: Vec<Record> =
            serde_json::from_str(r#"[{"id":"a","x":1},{"id":"b"}]"#).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(serde_json::to_value(&records[0]).unwrap(), json!({"id":"a","x":1}));

        let bad: std::result::Result<Vec<Record>, _> = serde_json::from_str(r#"[{"x":1}]"#);
        assert!(bad.is_err());
    }

    proptest! {
        #[test]
        fn prop_any_string_id_survives_json(id in "[a-zA-Z0-9-]{1,24}") {
            let record = Record::from_value(json!({"id": id.clone()})).unwrap();
            let parsed = Record::from_json(&record.to_json().unwrap()).unwrap();
            prop_assert_eq!(parsed.id(), id.as_str());
        }
    }
}
