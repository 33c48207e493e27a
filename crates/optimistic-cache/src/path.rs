//! Dotted field paths (`"key1.val"`) over documents.

use std::borrow::Cow;

use serde_json::{Map, Value};

use crate::types::{Document, DocumentId};

/// Pseudo-field addressing the document id.
pub const DOCUMENT_ID_FIELD: &str = "__name__";

/// Reads a field by dotted path.
pub fn get<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Reads a field for query evaluation; `__name__` resolves to the id.
pub fn field<'a>(id: &DocumentId, doc: &'a Document, path: &str) -> Option<Cow<'a, Value>> {
    if path == DOCUMENT_ID_FIELD {
        return Some(Cow::Owned(Value::String(id.to_string())));
    }
    get(doc, path).map(Cow::Borrowed)
}

/// Writes a field by dotted path, creating or replacing intermediate maps.
pub fn set(doc: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let slot = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(child) = slot {
                set(child, rest, value);
            }
        }
    }
}

/// Keeps only the named (possibly dotted) fields.
pub fn pick(doc: &Document, fields: &[String]) -> Document {
    let mut picked = Document::new();
    for name in fields {
        if let Some(value) = get(doc, name) {
            set(&mut picked, name, value.clone());
        }
    }
    picked
}
