//! Mutations: single writes, batches and transactions.
//!
//! Writes may carry sentinel operators that are resolved against the prior
//! confirmed-plus-override value of the field at the moment the mutation
//! starts. On the wire a sentinel is a tagged array:
//!
//! ```text
//! ["::increment", n]   ["::arrayUnion", v]   ["::arrayRemove", v]   ["::serverTimestamp"]
//! ```

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde_json::{Map, Number, Value};

use crate::comparator::values_equal;
use crate::path;
use crate::store::DocumentStore;
use crate::types::{CollectionPath, Document, DocumentId, OrderedKey, QueryDescriptor};
use crate::CacheError;

const INCREMENT: &str = "::increment";
const ARRAY_UNION: &str = "::arrayUnion";
const ARRAY_REMOVE: &str = "::arrayRemove";
const SERVER_TIMESTAMP: &str = "::serverTimestamp";

/// A field value in a write, possibly a sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    /// Adds to the prior number (base 0).
    Increment(Number),
    /// Appends values not already present.
    ArrayUnion(Vec<Value>),
    /// Removes every occurrence of the values.
    ArrayRemove(Vec<Value>),
    /// Resolves to the mutation's timestamp placeholder.
    ServerTimestamp,
    /// A date, stored as RFC 3339 UTC text with millisecond precision.
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    /// Parses a wire value, recognising sentinel arrays.
    pub fn from_json(value: Value) -> Self {
        let Value::Array(items) = &value else {
            return Self::Value(value);
        };
        let Some(tag) = items.first().and_then(Value::as_str) else {
            return Self::Value(value);
        };
        let args = &items[1..];
        match tag {
            INCREMENT => match args.first() {
                Some(Value::Number(n)) => Self::Increment(n.clone()),
                _ => Self::Value(value),
            },
            ARRAY_UNION => Self::ArrayUnion(sentinel_values(args)),
            ARRAY_REMOVE => Self::ArrayRemove(sentinel_values(args)),
            SERVER_TIMESTAMP => Self::ServerTimestamp,
            _ => Self::Value(value),
        }
    }

    /// Resolves the value against the prior field value.
    pub fn resolve(&self, prior: Option<&Value>, timestamp: &Value) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::Increment(delta) => increment(prior, delta),
            Self::ArrayUnion(values) => {
                let mut items = prior_array(prior);
                for value in values {
                    if !items.iter().any(|item| values_equal(item, value)) {
                        items.push(value.clone());
                    }
                }
                Value::Array(items)
            }
            Self::ArrayRemove(values) => {
                let mut items = prior_array(prior);
                items.retain(|item| !values.iter().any(|value| values_equal(item, value)));
                Value::Array(items)
            }
            Self::ServerTimestamp => timestamp.clone(),
            Self::Timestamp(at) => Value::String(format_timestamp(at)),
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(at: DateTime<Utc>) -> Self {
        Self::Timestamp(at)
    }
}

/// Formats a date the way documents store it: `2021-01-01T00:00:00.000Z`.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn sentinel_values(args: &[Value]) -> Vec<Value> {
    match args {
        [Value::Array(items)] => items.clone(),
        other => other.to_vec(),
    }
}

fn prior_array(prior: Option<&Value>) -> Vec<Value> {
    match prior {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn increment(prior: Option<&Value>, delta: &Number) -> Value {
    let base = match prior {
        Some(Value::Number(n)) => n.clone(),
        _ => Number::from(0),
    };
    if let (Some(a), Some(b)) = (base.as_i64(), delta.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Value::Number(Number::from(sum));
        }
    }
    let sum = base.as_f64().unwrap_or(0.0) + delta.as_f64().unwrap_or(0.0);
    Number::from_f64(sum).map(Value::Number).unwrap_or(Value::Null)
}

// ============================================================================
// Writes
// ============================================================================

/// One document write.
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    pub path: CollectionPath,
    pub id: DocumentId,
    /// Field updates, applied left to right. Keys may be dotted paths.
    pub fields: IndexMap<String, FieldValue>,
}

impl Write {
    pub fn new(path: impl Into<CollectionPath>, id: impl Into<DocumentId>) -> Self {
        Self {
            path: path.into(),
            id: id.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn increment(self, field: impl Into<String>, delta: impl Into<Number>) -> Self {
        self.set(field, FieldValue::Increment(delta.into()))
    }

    pub fn array_union(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.set(field, FieldValue::ArrayUnion(values))
    }

    pub fn array_remove(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.set(field, FieldValue::ArrayRemove(values))
    }

    pub fn server_timestamp(self, field: impl Into<String>) -> Self {
        self.set(field, FieldValue::ServerTimestamp)
    }

    pub fn key(&self) -> OrderedKey {
        (self.path.clone(), self.id.clone())
    }

    /// Parses `{path, id, ...fields}` or `{collection, doc, data}`.
    pub fn from_json(value: &Value) -> Result<Self, CacheError> {
        let object = value
            .as_object()
            .ok_or_else(|| CacheError::MalformedEvent(format!("write is not an object: {value}")))?;

        if let (Some(path), Some(id)) = (string_field(object, "path"), string_field(object, "id")) {
            let fields = object
                .iter()
                .filter(|(key, _)| key.as_str() != "path" && key.as_str() != "id")
                .map(|(key, value)| (key.clone(), FieldValue::from_json(value.clone())))
                .collect();
            return Ok(Self {
                path: path.into(),
                id: id.into(),
                fields,
            });
        }

        if let (Some(path), Some(id)) = (string_field(object, "collection"), string_field(object, "doc")) {
            let fields = match object.get("data") {
                Some(Value::Object(data)) => data
                    .iter()
                    .map(|(key, value)| (key.clone(), FieldValue::from_json(value.clone())))
                    .collect(),
                None | Some(Value::Null) => IndexMap::new(),
                Some(other) => {
                    return Err(CacheError::MalformedEvent(format!(
                        "write data is not an object: {other}"
                    )))
                }
            };
            return Ok(Self {
                path: path.into(),
                id: id.into(),
                fields,
            });
        }

        Err(CacheError::MalformedEvent(format!(
            "write has neither path/id nor collection/doc: {value}"
        )))
    }
}

fn string_field<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    object.get(key).and_then(Value::as_str)
}

/// Resolves a write into the partial document merged into the override layer.
///
/// The patch starts with the `path` and `id` identity fields. A dotted key
/// deep-sets into a copy of its top-level field, taken from the patch if an
/// earlier key already touched it, else from `prior`.
pub fn apply_write(write: &Write, prior: Option<&Document>, timestamp: &Value) -> Document {
    let mut patch = Document::new();
    patch.insert("path".to_string(), Value::String(write.path.to_string()));
    patch.insert("id".to_string(), Value::String(write.id.to_string()));

    for (key, field) in &write.fields {
        match key.split_once('.') {
            None => {
                let current = patch
                    .get(key)
                    .or_else(|| prior.and_then(|doc| doc.get(key)));
                let value = field.resolve(current, timestamp);
                patch.insert(key.clone(), value);
            }
            Some((head, rest)) => {
                let mut base = patch
                    .get(head)
                    .or_else(|| prior.and_then(|doc| doc.get(head)))
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let value = field.resolve(path::get(&base, rest), timestamp);
                path::set(&mut base, rest, value);
                patch.insert(head.to_string(), Value::Object(base));
            }
        }
    }
    patch
}

// ============================================================================
// Transactions
// ============================================================================

/// A value a transaction reads before computing its writes.
#[derive(Debug, Clone, PartialEq)]
pub enum Read {
    /// A confirmed document (`null` when absent).
    Document {
        collection: CollectionPath,
        doc: DocumentId,
    },
    /// A query read. Not supported; rejects the mutation.
    Query(QueryDescriptor),
    /// A literal value.
    Provided(Value),
}

impl Read {
    fn from_json(value: &Value) -> Result<Self, CacheError> {
        let Some(object) = value.as_object() else {
            return Ok(Self::Provided(value.clone()));
        };
        match (string_field(object, "collection"), string_field(object, "doc")) {
            (Some(collection), Some(doc)) => Ok(Self::Document {
                collection: collection.into(),
                doc: doc.into(),
            }),
            (Some(_), None) => serde_json::from_value(value.clone())
                .map(Self::Query)
                .map_err(|e| CacheError::MalformedEvent(format!("invalid transaction read: {e}"))),
            _ => Ok(Self::Provided(value.clone())),
        }
    }

    fn resolve(&self, key: &str, database: &DocumentStore) -> Result<Value, CacheError> {
        match self {
            Self::Document { collection, doc } => Ok(database
                .get(collection, doc)
                .map(|d| Value::Object(d.clone()))
                .unwrap_or(Value::Null)),
            Self::Query(query) => Err(CacheError::TransactionQuery(format!(
                "read `{key}` is a query on `{}`; transactions only read documents",
                query.collection
            ))),
            Self::Provided(value) => Ok(value.clone()),
        }
    }
}

/// Computes writes from resolved reads.
pub type WriteFn = Arc<dyn Fn(&IndexMap<String, Value>) -> Vec<Write> + Send + Sync>;

/// A read-then-write transaction.
#[derive(Clone, Default)]
pub struct Transaction {
    pub reads: IndexMap<String, Read>,
    pub writes: Vec<WriteFn>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, key: impl Into<String>, read: Read) -> Self {
        self.reads.insert(key.into(), read);
        self
    }

    pub fn write<F>(mut self, f: F) -> Self
    where
        F: Fn(&IndexMap<String, Value>) -> Vec<Write> + Send + Sync + 'static,
    {
        self.writes.push(Arc::new(f));
        self
    }

    fn from_json(object: &Map<String, Value>) -> Result<Self, CacheError> {
        let mut transaction = Self::new();
        if let Some(reads) = object.get("reads") {
            let reads = reads.as_object().ok_or_else(|| {
                CacheError::MalformedEvent("transaction reads is not an object".to_string())
            })?;
            for (key, read) in reads {
                transaction.reads.insert(key.clone(), Read::from_json(read)?);
            }
        }
        let writes = match object.get("writes") {
            Some(Value::Array(writes)) => writes.clone(),
            Some(single) => vec![single.clone()],
            None => Vec::new(),
        };
        for write in writes {
            let parsed = flatten_writes(&write)?;
            transaction = transaction.write(move |_| parsed.clone());
        }
        Ok(transaction)
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("reads", &self.reads)
            .field("writes", &self.writes.len())
            .finish()
    }
}

/// A write, a batch of writes, or a transaction.
#[derive(Debug, Clone)]
pub enum Mutation {
    Write(Write),
    Batch(Vec<Write>),
    Transaction(Transaction),
}

impl Mutation {
    /// Parses a wire mutation. Arrays, nested or not, become a batch.
    pub fn from_json(value: &Value) -> Result<Self, CacheError> {
        match value {
            Value::Array(_) => flatten_writes(value).map(Self::Batch),
            Value::Object(object) if object.contains_key("reads") || object.contains_key("writes") => {
                Transaction::from_json(object).map(Self::Transaction)
            }
            other => Write::from_json(other).map(Self::Write),
        }
    }

    /// Resolves reads against the confirmed database and returns the writes.
    pub fn resolve(&self, database: &DocumentStore) -> Result<Vec<Write>, CacheError> {
        match self {
            Self::Write(write) => Ok(vec![write.clone()]),
            Self::Batch(writes) => Ok(writes.clone()),
            Self::Transaction(transaction) => {
                let mut values = IndexMap::new();
                for (key, read) in &transaction.reads {
                    values.insert(key.clone(), read.resolve(key, database)?);
                }
                Ok(transaction
                    .writes
                    .iter()
                    .flat_map(|write| write(&values))
                    .collect())
            }
        }
    }

    /// Documents the mutation targets without running transaction functions.
    pub fn static_targets(&self) -> Vec<OrderedKey> {
        match self {
            Self::Write(write) => vec![write.key()],
            Self::Batch(writes) => writes.iter().map(Write::key).collect(),
            Self::Transaction(_) => Vec::new(),
        }
    }
}

impl From<Write> for Mutation {
    fn from(write: Write) -> Self {
        Self::Write(write)
    }
}

impl From<Vec<Write>> for Mutation {
    fn from(writes: Vec<Write>) -> Self {
        Self::Batch(writes)
    }
}

impl From<Transaction> for Mutation {
    fn from(transaction: Transaction) -> Self {
        Self::Transaction(transaction)
    }
}

fn flatten_writes(value: &Value) -> Result<Vec<Write>, CacheError> {
    match value {
        Value::Array(items) => {
            let mut writes = Vec::new();
            for item in items {
                writes.extend(flatten_writes(item)?);
            }
            Ok(writes)
        }
        other => Write::from_json(other).map(|write| vec![write]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn parses_sentinels() {
        assert_eq!(
            FieldValue::from_json(json!(["::increment", 2])),
            FieldValue::Increment(Number::from(2))
        );
        assert_eq!(
            FieldValue::from_json(json!(["::arrayUnion", "a"])),
            FieldValue::ArrayUnion(vec![json!("a")])
        );
        assert_eq!(
            FieldValue::from_json(json!(["::arrayRemove", ["a", "b"]])),
            FieldValue::ArrayRemove(vec![json!("a"), json!("b")])
        );
        assert_eq!(
            FieldValue::from_json(json!(["::serverTimestamp"])),
            FieldValue::ServerTimestamp
        );
        assert_eq!(
            FieldValue::from_json(json!(["plain", 1])),
            FieldValue::Value(json!(["plain", 1]))
        );
    }

    #[test]
    fn increment_arithmetic() {
        let inc = FieldValue::Increment(Number::from(2));
        assert_eq!(inc.resolve(Some(&json!(3)), &Value::Null), json!(5));
        assert_eq!(inc.resolve(None, &Value::Null), json!(2));
        assert_eq!(inc.resolve(Some(&json!("x")), &Value::Null), json!(2));
        assert_eq!(inc.resolve(Some(&json!(1.5)), &Value::Null), json!(3.5));
    }

    #[test]
    fn array_sentinels() {
        let prior = json!(["a", "b"]);
        assert_eq!(
            FieldValue::ArrayUnion(vec![json!("b"), json!("c")]).resolve(Some(&prior), &Value::Null),
            json!(["a", "b", "c"])
        );
        assert_eq!(
            FieldValue::ArrayRemove(vec![json!("a")]).resolve(Some(&prior), &Value::Null),
            json!(["b"])
        );
        assert_eq!(
            FieldValue::ArrayRemove(vec![json!("a")]).resolve(None, &Value::Null),
            json!([])
        );
    }

    #[test]
    fn timestamps() {
        let at = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            FieldValue::from(at).resolve(None, &Value::Null),
            json!("2021-01-01T00:00:00.000Z")
        );
        assert_eq!(FieldValue::ServerTimestamp.resolve(None, &Value::Null), Value::Null);
        assert_eq!(
            FieldValue::ServerTimestamp.resolve(None, &json!("ts-placeholder")),
            json!("ts-placeholder")
        );
    }

    #[test]
    fn apply_write_identity_and_dotted_keys() {
        let prior = doc(json!({"id": "a", "key1": {"val": 1, "other": true}, "n": 4}));
        let write = Write::new("things", "a")
            .set("key1.val", json!(7))
            .increment("n", 1);
        let patch = apply_write(&write, Some(&prior), &Value::Null);
        assert_eq!(
            Value::Object(patch),
            json!({
                "path": "things",
                "id": "a",
                "key1": {"val": 7, "other": true},
                "n": 5,
            })
        );
    }

    #[test]
    fn dotted_keys_compose_within_one_write() {
        let write = Write::new("things", "a")
            .set("m.a", json!(1))
            .set("m.b", json!(2));
        let patch = apply_write(&write, None, &Value::Null);
        assert_eq!(patch["m"], json!({"a": 1, "b": 2}));
    }

    #[test]
    fn write_wire_forms() {
        let flat = Write::from_json(&json!({"path": "c", "id": "d", "n": ["::increment", 1]})).unwrap();
        assert_eq!(flat.key(), ("c".into(), "d".into()));
        assert_eq!(flat.fields["n"], FieldValue::Increment(Number::from(1)));

        let nested = Write::from_json(&json!({"collection": "c", "doc": "d", "data": {"x": 1}})).unwrap();
        assert_eq!(nested.fields["x"], FieldValue::Value(json!(1)));

        assert!(Write::from_json(&json!({"x": 1})).is_err());
        assert!(Write::from_json(&json!("nope")).is_err());
    }

    #[test]
    fn nested_arrays_flatten_into_batch() {
        let mutation = Mutation::from_json(&json!([
            {"path": "c", "id": "1"},
            [{"path": "c", "id": "2"}, [{"path": "c", "id": "3"}]],
        ]))
        .unwrap();
        let ids: Vec<_> = mutation
            .static_targets()
            .into_iter()
            .map(|(_, id)| id.to_string())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn transaction_reads_confirmed_documents() {
        let database = DocumentStore::new().set(&"c".into(), &"a".into(), doc(json!({"n": 2})));
        let transaction = Transaction::new()
            .read("a", Read::Document {
                collection: "c".into(),
                doc: "a".into(),
            })
            .read("missing", Read::Document {
                collection: "c".into(),
                doc: "zzz".into(),
            })
            .write(|reads| {
                let n = reads["a"]["n"].as_i64().unwrap_or(0);
                assert!(reads["missing"].is_null());
                vec![Write::new("c", "a").set("n", json!(n * 10))]
            });
        let writes = Mutation::from(transaction).resolve(&database).unwrap();
        assert_eq!(writes, vec![Write::new("c", "a").set("n", json!(20))]);
    }

    #[test]
    fn transaction_query_read_is_rejected() {
        let mutation = Mutation::from_json(&json!({
            "reads": {"open": {"collection": "c", "where": ["done", "==", false]}},
            "writes": [{"path": "c", "id": "a", "x": 1}],
        }))
        .unwrap();
        let err = mutation.resolve(&DocumentStore::new()).unwrap_err();
        assert!(matches!(err, CacheError::TransactionQuery(_)));
    }
}
