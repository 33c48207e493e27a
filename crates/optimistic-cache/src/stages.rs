//! Transform stages composed by the pipeline.
//!
//! Every stage is a total function over [`PipelineValue`]: a stage that
//! receives a shape it does not expect coerces it (a store yields no rows, rows
//! fold back into a collection) rather than failing.

use std::cmp::Ordering;
use std::sync::Arc;

use serde_json::Value;

use crate::comparator::total_cmp;
use crate::path;
use crate::store::DocumentStore;
use crate::types::{
    Collection, CollectionPath, Direction, Document, DocumentId, OrderBy, Populate, WhereClause,
};

/// One result row. `doc` is `None` for an id the collection does not hold.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: DocumentId,
    pub doc: Option<Arc<Document>>,
}

impl Row {
    pub fn new(id: DocumentId, doc: Arc<Document>) -> Self {
        Self { id, doc: Some(doc) }
    }

    pub fn is_hole(&self) -> bool {
        self.doc.is_none()
    }
}

/// The value flowing between stages.
#[derive(Debug, Clone)]
pub enum PipelineValue<'a> {
    /// The whole confirmed database.
    Store(&'a DocumentStore),
    /// One collection's documents, keyed by id.
    Collection(Collection),
    /// Ordered rows.
    Rows(Vec<Row>),
}

impl<'a> PipelineValue<'a> {
    /// Coerces into rows. A store yields no rows.
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Self::Store(_) => Vec::new(),
            Self::Collection(collection) => collection
                .into_iter()
                .map(|(id, doc)| Row::new(id, doc))
                .collect(),
            Self::Rows(rows) => rows,
        }
    }

    /// Coerces into a collection, dropping holes.
    pub fn into_collection(self) -> Collection {
        match self {
            Self::Store(_) => Collection::new(),
            Self::Collection(collection) => collection,
            Self::Rows(rows) => rows
                .into_iter()
                .filter_map(|row| row.doc.map(|doc| (row.id, doc)))
                .collect(),
        }
    }
}

/// Which sides of the result window a cursor bounds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorWindow {
    pub order_by: Vec<OrderBy>,
    pub start_at: Option<Value>,
    pub start_after: Option<Value>,
    pub end_at: Option<Value>,
    pub end_before: Option<Value>,
}

impl CursorWindow {
    fn keys(&self) -> Vec<OrderBy> {
        if self.order_by.is_empty() {
            vec![OrderBy::asc(path::DOCUMENT_ID_FIELD)]
        } else {
            self.order_by.clone()
        }
    }

    fn admits(&self, keys: &[OrderBy], row: &Row) -> bool {
        let Some(doc) = row.doc.as_deref() else {
            return false;
        };
        let position = |cursor: &Value| cursor_position(keys, &row.id, doc, cursor);
        if let Some(cursor) = &self.start_at {
            if position(cursor) == Ordering::Less {
                return false;
            }
        }
        if let Some(cursor) = &self.start_after {
            if position(cursor) != Ordering::Greater {
                return false;
            }
        }
        if let Some(cursor) = &self.end_at {
            if position(cursor) == Ordering::Greater {
                return false;
            }
        }
        if let Some(cursor) = &self.end_before {
            if position(cursor) != Ordering::Less {
                return false;
            }
        }
        true
    }
}

/// Where a row sits relative to a cursor, in query order.
fn cursor_position(keys: &[OrderBy], id: &DocumentId, doc: &Document, cursor: &Value) -> Ordering {
    let values: Vec<&Value> = match cursor {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };
    for (key, bound) in keys.iter().zip(values) {
        let field = path::field(id, doc, &key.field);
        let ord = total_cmp(field.as_deref().unwrap_or(&Value::Null), bound);
        let ord = match key.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// A transformation step.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Join sibling documents into a copy of the parent collection.
    Populate {
        collection: CollectionPath,
        populates: Vec<Populate>,
    },
    /// Project one collection out of the store.
    Collection(CollectionPath),
    /// Map a known id list to rows; unknown ids become holes.
    DocumentIds(Vec<DocumentId>),
    /// Apply one pending override: `None` deletes, `Some` shallow-merges.
    Override {
        id: DocumentId,
        patch: Option<Document>,
    },
    /// Keep rows matching the clause.
    Filter(WhereClause),
    /// Stable multi-key sort; a missing field sorts first.
    Sort(Vec<OrderBy>),
    /// Keep rows inside the cursor window.
    Cursor(CursorWindow),
    /// Keep the first N rows.
    Limit(usize),
    /// Keep only the named fields.
    Fields(Vec<String>),
}

impl Stage {
    /// Applies the stage.
    pub fn apply<'a>(&self, value: PipelineValue<'a>) -> PipelineValue<'a> {
        match self {
            Self::Populate {
                collection,
                populates,
            } => match value {
                PipelineValue::Store(store) => {
                    PipelineValue::Collection(populate(store, collection, populates))
                }
                other => other,
            },
            Self::Collection(path) => match value {
                PipelineValue::Store(store) => PipelineValue::Collection(
                    store.collection(path).cloned().unwrap_or_default(),
                ),
                other => PipelineValue::Collection(other.into_collection()),
            },
            Self::DocumentIds(ids) => {
                let collection = value.into_collection();
                PipelineValue::Rows(
                    ids.iter()
                        .map(|id| Row {
                            id: id.clone(),
                            doc: collection.get(id).cloned(),
                        })
                        .collect(),
                )
            }
            Self::Override { id, patch } => {
                let mut collection = value.into_collection();
                match patch {
                    None => {
                        collection.shift_remove(id);
                    }
                    Some(patch) => {
                        let doc = collection.entry(id.clone()).or_default();
                        let doc = Arc::make_mut(doc);
                        for (key, field) in patch {
                            doc.insert(key.clone(), field.clone());
                        }
                    }
                }
                PipelineValue::Collection(collection)
            }
            Self::Filter(clause) => {
                let mut rows = value.into_rows();
                rows.retain(|row| match row.doc.as_deref() {
                    Some(doc) => {
                        let field = path::field(&row.id, doc, &clause.field);
                        clause.op.matches(field.as_deref(), &clause.value)
                    }
                    None => false,
                });
                PipelineValue::Rows(rows)
            }
            Self::Sort(order_by) => {
                let mut rows = value.into_rows();
                rows.sort_by(|a, b| compare_rows(order_by, a, b));
                PipelineValue::Rows(rows)
            }
            Self::Cursor(window) => {
                let keys = window.keys();
                let mut rows = value.into_rows();
                rows.retain(|row| window.admits(&keys, row));
                PipelineValue::Rows(rows)
            }
            Self::Limit(limit) => {
                let mut rows = value.into_rows();
                rows.truncate(*limit);
                PipelineValue::Rows(rows)
            }
            Self::Fields(fields) => {
                let rows = value
                    .into_rows()
                    .into_iter()
                    .map(|row| Row {
                        doc: row.doc.map(|doc| Arc::new(path::pick(&doc, fields))),
                        id: row.id,
                    })
                    .collect();
                PipelineValue::Rows(rows)
            }
        }
    }
}

fn populate(store: &DocumentStore, path: &CollectionPath, populates: &[Populate]) -> Collection {
    let mut collection = store.collection(path).cloned().unwrap_or_default();
    for join in populates {
        let Some(siblings) = store.collection(&join.collection) else {
            continue;
        };
        for doc in collection.values_mut() {
            let sibling = path::get(doc, &join.local_field)
                .and_then(join_key)
                .and_then(|id| siblings.get(&id));
            if let Some(sibling) = sibling {
                let copy = Value::Object(sibling.as_ref().clone());
                path::set(Arc::make_mut(doc), &join.target_field, copy);
            }
        }
    }
    collection
}

/// Sibling ids are strings; a numeric foreign key names the same id.
fn join_key(value: &Value) -> Option<DocumentId> {
    match value {
        Value::String(id) => Some(DocumentId::from(id.as_str())),
        Value::Number(id) => Some(DocumentId::from(id.to_string())),
        _ => None,
    }
}

fn compare_rows(order_by: &[OrderBy], a: &Row, b: &Row) -> Ordering {
    let empty = Document::new();
    let doc_a = a.doc.as_deref().unwrap_or(&empty);
    let doc_b = b.doc.as_deref().unwrap_or(&empty);
    for key in order_by {
        let left = path::field(&a.id, doc_a, &key.field);
        let right = path::field(&b.id, doc_b, &key.field);
        let ord = match (left.as_deref(), right.as_deref()) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(left), Some(right)) => total_cmp(left, right),
        };
        let ord = match key.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
