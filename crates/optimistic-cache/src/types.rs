//! Core types for the optimistic cache.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::comparator::Operator;

/// Opaque key of a collection in the document store (e.g. `"projects"`).
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionPath(pub String);

impl CollectionPath {
    /// Creates a collection path from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the collection path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CollectionPath {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CollectionPath {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a document, unique within its collection.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    /// Creates a document ID from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the document ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A document: an arbitrary field mapping carrying `id` and `path` identity fields.
pub type Document = serde_json::Map<String, Value>;

/// Confirmed documents of one collection, in first-confirmation order.
pub type Collection = IndexMap<DocumentId, Arc<Document>>;

/// Identity of one query result row: `[collectionPath, documentId]`.
pub type OrderedKey = (CollectionPath, DocumentId);

/// Where a query entry's `ordered` list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Via {
    /// Resolved locally before any server response arrived.
    #[default]
    Memory,
    /// Exactly the server-confirmed order.
    Cache,
    /// Recomputed locally because pending overrides changed the result.
    Optimistic,
}

impl Via {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Cache => "cache",
            Self::Optimistic => "optimistic",
        }
    }
}

// ============================================================================
// Query descriptor
// ============================================================================

/// A single `[field, operator, value]` where-clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, Operator, Value)", into = "(String, Operator, Value)")]
pub struct WhereClause {
    pub field: String,
    pub op: Operator,
    pub value: Value,
}

impl WhereClause {
    pub fn new(field: impl Into<String>, op: impl Into<Operator>, value: Value) -> Self {
        Self {
            field: field.into(),
            op: op.into(),
            value,
        }
    }
}

impl From<(String, Operator, Value)> for WhereClause {
    fn from((field, op, value): (String, Operator, Value)) -> Self {
        Self { field, op, value }
    }
}

impl From<WhereClause> for (String, Operator, Value) {
    fn from(clause: WhereClause) -> Self {
        (clause.field, clause.op, clause.value)
    }
}

/// Sort direction of an `orderBy` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// One `[field, direction]` sort key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, Direction)", into = "(String, Direction)")]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }
}

impl From<(String, Direction)> for OrderBy {
    fn from((field, direction): (String, Direction)) -> Self {
        Self { field, direction }
    }
}

impl From<OrderBy> for (String, Direction) {
    fn from(order: OrderBy) -> Self {
        (order.field, order.direction)
    }
}

/// A sibling join: `[localField, siblingCollectionPath, targetField]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "(String, CollectionPath, String)",
    into = "(String, CollectionPath, String)"
)]
pub struct Populate {
    pub local_field: String,
    pub collection: CollectionPath,
    pub target_field: String,
}

impl From<(String, CollectionPath, String)> for Populate {
    fn from((local_field, collection, target_field): (String, CollectionPath, String)) -> Self {
        Self {
            local_field,
            collection,
            target_field,
        }
    }
}

impl From<Populate> for (String, CollectionPath, String) {
    fn from(p: Populate) -> Self {
        (p.local_field, p.collection, p.target_field)
    }
}

/// A query against one collection, as carried in event metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescriptor {
    pub collection: CollectionPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_as: Option<String>,
    #[serde(
        rename = "where",
        default,
        deserialize_with = "deserialize_clauses",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub where_clauses: Vec<WhereClause>,
    #[serde(
        default,
        deserialize_with = "deserialize_order_by",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub order_by: Vec<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub populates: Vec<Populate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_after: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_before: Option<Value>,
}

impl QueryDescriptor {
    /// Creates an unfiltered query over a collection.
    pub fn new(collection: impl Into<CollectionPath>) -> Self {
        Self {
            collection: collection.into(),
            store_as: None,
            where_clauses: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            fields: None,
            populates: Vec::new(),
            start_at: None,
            start_after: None,
            end_at: None,
            end_before: None,
        }
    }

    pub fn store_as(mut self, alias: impl Into<String>) -> Self {
        self.store_as = Some(alias.into());
        self
    }

    pub fn filter(mut self, clause: WhereClause) -> Self {
        self.where_clauses.push(clause);
        self
    }

    pub fn order(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns the alias this query is registered under.
    ///
    /// `storeAs` wins; otherwise a deterministic name is derived from the
    /// collection and the query settings.
    pub fn alias(&self) -> String {
        match &self.store_as {
            Some(alias) => alias.clone(),
            None => self.base_query_name(),
        }
    }

    /// Whether any pagination cursor is set.
    pub fn has_cursor(&self) -> bool {
        self.start_at.is_some()
            || self.start_after.is_some()
            || self.end_at.is_some()
            || self.end_before.is_some()
    }

    /// Whether a change in `path` can affect this query's result.
    pub fn touches(&self, path: &CollectionPath) -> bool {
        &self.collection == path || self.populates.iter().any(|p| &p.collection == path)
    }

    fn base_query_name(&self) -> String {
        let mut name = self.collection.to_string();
        if !self.where_clauses.is_empty() {
            let clauses: Vec<String> = self
                .where_clauses
                .iter()
                .map(|c| format!("{}{}{}", c.field, c.op.as_str(), c.value))
                .collect();
            name.push_str("?where=");
            name.push_str(&clauses.join(","));
        }
        if !self.order_by.is_empty() {
            let orders: Vec<String> = self
                .order_by
                .iter()
                .map(|o| format!("{}:{}", o.field, o.direction.as_str()))
                .collect();
            name.push_str("?orderBy=");
            name.push_str(&orders.join(","));
        }
        if let Some(limit) = self.limit {
            name.push_str(&format!("?limit={limit}"));
        }
        for (label, cursor) in [
            ("startAt", &self.start_at),
            ("startAfter", &self.start_after),
            ("endAt", &self.end_at),
            ("endBefore", &self.end_before),
        ] {
            if let Some(cursor) = cursor {
                name.push_str(&format!("?{label}={cursor}"));
            }
        }
        name
    }
}

/// Accepts `null`, a single `[field, op, value]` clause, or a list of clauses.
///
/// A flat array whose first element is not itself an array is one clause.
fn deserialize_clauses<'de, D>(deserializer: D) -> Result<Vec<WhereClause>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    match raw {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) if items.is_empty() => Ok(Vec::new()),
        Value::Array(items) if !items[0].is_array() => {
            let clause = serde_json::from_value(Value::Array(items)).map_err(D::Error::custom)?;
            Ok(vec![clause])
        }
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(D::Error::custom))
            .collect(),
        other => Err(D::Error::custom(format!("invalid where clause: {other}"))),
    }
}

/// Accepts `"field"`, `["field"]`, `["field", "desc"]`, or a list of those.
fn deserialize_order_by<'de, D>(deserializer: D) -> Result<Vec<OrderBy>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    match raw {
        Value::Null => Ok(Vec::new()),
        Value::String(field) => Ok(vec![OrderBy::asc(field)]),
        Value::Array(items) => {
            let is_single = match items.as_slice() {
                [Value::String(_)] => true,
                [Value::String(_), Value::String(dir)] => dir == "asc" || dir == "desc",
                _ => false,
            };
            if is_single {
                return parse_order(&Value::Array(items)).map(|o| vec![o]).map_err(D::Error::custom);
            }
            items
                .iter()
                .map(|item| parse_order(item).map_err(D::Error::custom))
                .collect()
        }
        other => Err(D::Error::custom(format!("invalid orderBy: {other}"))),
    }
}

fn parse_order(value: &Value) -> Result<OrderBy, String> {
    match value {
        Value::String(field) => Ok(OrderBy::asc(field.clone())),
        Value::Array(parts) => match parts.as_slice() {
            [Value::String(field)] => Ok(OrderBy::asc(field.clone())),
            [Value::String(field), Value::String(dir)] => match dir.as_str() {
                "asc" => Ok(OrderBy::asc(field.clone())),
                "desc" => Ok(OrderBy::desc(field.clone())),
                other => Err(format!("invalid orderBy direction: {other}")),
            },
            _ => Err(format!("invalid orderBy entry: {value}")),
        },
        _ => Err(format!("invalid orderBy entry: {value}")),
    }
}

// ============================================================================
// Query entries
// ============================================================================

/// A registered query: its descriptor plus the materialized result order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryEntry {
    #[serde(flatten)]
    pub query: QueryDescriptor,
    /// Materialized result order, overrides included.
    pub ordered: Vec<OrderedKey>,
    /// Last server-confirmed order; `None` until the first server response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<Vec<OrderedKey>>,
    pub via: Via,
    /// Whether a listener is currently attached.
    #[serde(default)]
    pub live: bool,
}

impl QueryEntry {
    /// Creates an entry with no server response yet.
    pub fn pending(query: QueryDescriptor) -> Self {
        Self {
            query,
            ordered: Vec::new(),
            confirmed: None,
            via: Via::Memory,
            live: true,
        }
    }

    /// Creates an entry from a server-confirmed order.
    pub fn confirmed(query: QueryDescriptor, ordered: Vec<OrderedKey>) -> Self {
        Self {
            query,
            ordered: ordered.clone(),
            confirmed: Some(ordered),
            via: Via::Cache,
            live: true,
        }
    }

    /// Whether this entry lists the given document.
    pub fn references(&self, key: &OrderedKey) -> bool {
        self.ordered.contains(key)
            || self
                .confirmed
                .as_ref()
                .is_some_and(|confirmed| confirmed.contains(key))
    }
}

/// The outbound view of a query entry consumed by UI bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub ordered: Vec<OrderedKey>,
    #[serde(flatten)]
    pub query: QueryDescriptor,
    pub via: Via,
}

impl From<&QueryEntry> for QueryResult {
    fn from(entry: &QueryEntry) -> Self {
        Self {
            ordered: entry.ordered.clone(),
            query: entry.query.clone(),
            via: entry.via,
        }
    }
}
