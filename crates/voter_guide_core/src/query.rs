//! crates/voter_guide_core/src/query.rs
//!
//! Store-agnostic description of documents, collections, queries and writes.
//! These are the vocabulary of the `DocumentStore` port.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

use crate::ports::{PortError, PortResult};

/// The field map of a schemaless document.
pub type Fields = Map<String, Value>;

pub const CANDIDATES: &str = "candidates";
pub const POLICIES: &str = "policies";
pub const COMMENTS: &str = "comments";
pub const USERS: &str = "users";

/// A slash-separated collection path, e.g. `candidates` or `candidates/abc/policies`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn root(name: &str) -> Self {
        Self(name.to_string())
    }

    /// A sub-collection scoped under a parent document.
    pub fn sub(parent: &CollectionPath, parent_id: &str, name: &str) -> Self {
        Self(format!("{}/{}/{}", parent.0, parent_id, name))
    }

    pub fn candidates() -> Self {
        Self::root(CANDIDATES)
    }

    pub fn policies_of(candidate_id: &str) -> Self {
        Self::sub(&Self::candidates(), candidate_id, POLICIES)
    }

    pub fn comments() -> Self {
        Self::root(COMMENTS)
    }

    pub fn users() -> Self {
        Self::root(USERS)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document as returned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub fields: Fields,
}

impl StoredDocument {
    /// Deserializes the document, injecting its id as the `id` field.
    pub fn decode<T: DeserializeOwned>(&self) -> PortResult<T> {
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(fields)).map_err(|e| {
            PortError::Unexpected(format!("malformed document {}: {}", self.id, e))
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(String, Value),
    In(String, Vec<Value>),
}

impl Predicate {
    pub fn matches(&self, fields: &Fields) -> bool {
        match self {
            Predicate::Eq(field, expected) => fields.get(field) == Some(expected),
            Predicate::In(field, allowed) => fields
                .get(field)
                .map(|actual| allowed.contains(actual))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// A conjunctive query over a single collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: CollectionPath,
    pub predicates: Vec<Predicate>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(collection: CollectionPath) -> Self {
        Self {
            collection,
            predicates: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::Eq(field.to_string(), value.into()));
        self
    }

    pub fn where_in(mut self, field: &str, values: Vec<Value>) -> Self {
        self.predicates.push(Predicate::In(field.to_string(), values));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        self.predicates.iter().all(|p| p.matches(fields))
    }

    /// Orders and truncates documents that already satisfy the predicates.
    /// The sort is stable, so equal keys keep their input order.
    pub fn arrange(&self, mut docs: Vec<StoredDocument>) -> Vec<StoredDocument> {
        if let Some(order) = &self.order_by {
            docs.sort_by(|a, b| {
                let ord = compare_values(a.fields.get(&order.field), b.fields.get(&order.field));
                match order.direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }
        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
        docs
    }
}

/// Total order over optional JSON values: missing < null < bool < number < string.
/// Arrays and objects compare equal to each other.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(_) => 5,
        }
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// A write against one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentWrite {
    pub fields: Fields,
    /// Fields the store sets to its own current time.
    pub server_timestamps: Vec<String>,
    /// Fields removed from the document (merge only).
    pub remove: Vec<String>,
}

impl DocumentWrite {
    pub fn new(fields: Fields) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }

    /// Serializes a value into a write. The value must serialize to a JSON object.
    pub fn from_serialize<T: Serialize>(value: &T) -> PortResult<Self> {
        match serde_json::to_value(value) {
            Ok(Value::Object(fields)) => Ok(Self::new(fields)),
            Ok(_) => Err(PortError::Unexpected(
                "document payload must serialize to an object".to_string(),
            )),
            Err(e) => Err(PortError::Unexpected(e.to_string())),
        }
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn stamp(mut self, field: &str) -> Self {
        self.server_timestamps.push(field.to_string());
        self
    }

    pub fn remove(mut self, field: &str) -> Self {
        self.remove.push(field.to_string());
        self
    }

    /// Applies the write on top of `target`, using `now` for server timestamps.
    pub fn apply_to(&self, target: &mut Fields, now: &str) {
        for field in &self.remove {
            target.remove(field);
        }
        for (key, value) in &self.fields {
            target.insert(key.clone(), value.clone());
        }
        for field in &self.server_timestamps {
            target.insert(field.clone(), Value::String(now.to_string()));
        }
    }
}

/// Formats a server timestamp. Fixed precision keeps lexical and chronological order equal.
pub fn format_timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, fields: Value) -> StoredDocument {
        StoredDocument {
            id: id.to_string(),
            fields: fields.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_sub_collection_path() {
        let path = CollectionPath::policies_of("c1");
        assert_eq!(path.as_str(), "candidates/c1/policies");
    }

    #[test]
    fn test_in_predicate_requires_field() {
        let query = Query::new(CollectionPath::candidates())
            .where_in("status", vec![json!("incumbent"), json!("former")]);
        assert!(query.matches(json!({"status": "former"}).as_object().unwrap()));
        assert!(!query.matches(json!({"status": "newcomer"}).as_object().unwrap()));
        assert!(!query.matches(json!({}).as_object().unwrap()));
    }

    #[test]
    fn test_arrange_orders_descending_and_limits() {
        let query = Query::new(CollectionPath::comments())
            .order_by("createdAt", Direction::Desc)
            .limit(2);
        let docs = vec![
            doc("a", json!({"createdAt": "2024-01-01T00:00:00.000000Z"})),
            doc("b", json!({"createdAt": "2024-03-01T00:00:00.000000Z"})),
            doc("c", json!({"createdAt": "2024-02-01T00:00:00.000000Z"})),
        ];
        let ids: Vec<_> = query.arrange(docs).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_apply_write_stamps_and_removes() {
        let mut target = json!({"name": "old", "policies": []}).as_object().cloned().unwrap();
        let write = DocumentWrite::default()
            .set("name", "new")
            .stamp("updatedAt")
            .remove("policies");
        write.apply_to(&mut target, "2024-01-01T00:00:00.000000Z");
        assert_eq!(target.get("name"), Some(&json!("new")));
        assert_eq!(target.get("updatedAt"), Some(&json!("2024-01-01T00:00:00.000000Z")));
        assert!(!target.contains_key("policies"));
    }
}
