//! The two-layer document store.
//!
//! [`DocumentStore`] holds server-confirmed documents; [`OverrideLayer`] holds
//! speculative partial documents and tombstones. Both are persistent maps:
//! every level sits behind an `Arc` and mutation goes through
//! `Arc::make_mut`, so a clone taken before a write keeps observing the old
//! state while untouched collections and documents stay shared.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::{Collection, CollectionPath, Document, DocumentId};

/// Confirmed documents keyed by collection path, then document id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentStore {
    collections: Arc<IndexMap<CollectionPath, Arc<Collection>>>,
}

impl DocumentStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the confirmed document, if any.
    pub fn get(&self, path: &CollectionPath, id: &DocumentId) -> Option<&Document> {
        self.collections
            .get(path)
            .and_then(|collection| collection.get(id))
            .map(|doc| doc.as_ref())
    }

    /// Returns a collection's confirmed documents in natural order.
    pub fn collection(&self, path: &CollectionPath) -> Option<&Collection> {
        self.collections.get(path).map(|collection| collection.as_ref())
    }

    /// Returns the paths of all known collections.
    pub fn paths(&self) -> impl Iterator<Item = &CollectionPath> + '_ {
        self.collections.keys()
    }

    /// Returns true if the store holds no collections.
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Returns a new store with the document replaced.
    pub fn set(&self, path: &CollectionPath, id: &DocumentId, doc: Document) -> Self {
        let mut next = self.clone();
        next.insert(path, id, doc);
        next
    }

    /// Returns a new store with `partial` shallow-merged onto the document.
    pub fn merge(&self, path: &CollectionPath, id: &DocumentId, partial: &Document) -> Self {
        let mut next = self.clone();
        next.merge_into(path, id, partial);
        next
    }

    /// Returns a new store without the document.
    pub fn unset(&self, path: &CollectionPath, id: &DocumentId) -> Self {
        let mut next = self.clone();
        next.remove(path, id);
        next
    }

    /// Replaces a document in place. An identical document keeps its `Arc`.
    pub fn insert(&mut self, path: &CollectionPath, id: &DocumentId, doc: Document) {
        if self.get(path, id) == Some(&doc) {
            return;
        }
        let collections = Arc::make_mut(&mut self.collections);
        let collection = collections.entry(path.clone()).or_default();
        Arc::make_mut(collection).insert(id.clone(), Arc::new(doc));
    }

    /// Shallow-merges `partial` onto a document in place, creating it if absent.
    pub fn merge_into(&mut self, path: &CollectionPath, id: &DocumentId, partial: &Document) {
        let mut doc = self.get(path, id).cloned().unwrap_or_default();
        shallow_merge(&mut doc, partial);
        self.insert(path, id, doc);
    }

    /// Removes a document in place. The collection itself is kept.
    pub fn remove(&mut self, path: &CollectionPath, id: &DocumentId) -> Option<Arc<Document>> {
        if self.get(path, id).is_none() {
            return None;
        }
        let collections = Arc::make_mut(&mut self.collections);
        let collection = collections.get_mut(path)?;
        Arc::make_mut(collection).shift_remove(id)
    }
}

/// Pending overrides of one collection. `None` is a tombstone.
pub type OverrideCollection = IndexMap<DocumentId, Option<Document>>;

/// Speculative partial documents and tombstones awaiting confirmation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverrideLayer {
    collections: Arc<IndexMap<CollectionPath, Arc<OverrideCollection>>>,
}

impl OverrideLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pending override: `Some(None)` for a tombstone.
    pub fn get(&self, path: &CollectionPath, id: &DocumentId) -> Option<Option<&Document>> {
        self.collections
            .get(path)
            .and_then(|collection| collection.get(id))
            .map(Option::as_ref)
    }

    pub fn collection(&self, path: &CollectionPath) -> Option<&OverrideCollection> {
        self.collections.get(path).map(|collection| collection.as_ref())
    }

    /// Whether any override is pending for the collection.
    pub fn has_overrides(&self, path: &CollectionPath) -> bool {
        self.collections
            .get(path)
            .is_some_and(|collection| !collection.is_empty())
    }

    pub fn paths(&self) -> impl Iterator<Item = &CollectionPath> + '_ {
        self.collections.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Shallow-merges `partial` into the pending override. A tombstone is replaced.
    pub fn merge(&mut self, path: &CollectionPath, id: &DocumentId, partial: &Document) {
        let collections = Arc::make_mut(&mut self.collections);
        let collection = Arc::make_mut(collections.entry(path.clone()).or_default());
        match collection.get_mut(id) {
            Some(Some(existing)) => shallow_merge(existing, partial),
            Some(slot) => *slot = Some(partial.clone()),
            None => {
                collection.insert(id.clone(), Some(partial.clone()));
            }
        }
    }

    /// Marks the document as speculatively deleted.
    pub fn tombstone(&mut self, path: &CollectionPath, id: &DocumentId) {
        let collections = Arc::make_mut(&mut self.collections);
        let collection = Arc::make_mut(collections.entry(path.clone()).or_default());
        collection.insert(id.clone(), None);
    }

    /// Drops the pending override. An emptied collection is removed entirely.
    pub fn remove(&mut self, path: &CollectionPath, id: &DocumentId) -> bool {
        if self.get(path, id).is_none() {
            return false;
        }
        let collections = Arc::make_mut(&mut self.collections);
        let emptied = match collections.get_mut(path) {
            Some(collection) => {
                let collection = Arc::make_mut(collection);
                collection.shift_remove(id);
                collection.is_empty()
            }
            None => false,
        };
        if emptied {
            collections.shift_remove(path);
        }
        true
    }
}

/// Returns the confirmed document with its pending override applied.
///
/// A tombstone hides the document; a partial override is shallow-merged onto
/// the confirmed value (or an empty document).
pub fn merged_document(
    database: &DocumentStore,
    overrides: &OverrideLayer,
    path: &CollectionPath,
    id: &DocumentId,
) -> Option<Document> {
    match overrides.get(path, id) {
        Some(None) => None,
        Some(Some(partial)) => {
            let mut doc = database.get(path, id).cloned().unwrap_or_default();
            shallow_merge(&mut doc, partial);
            Some(doc)
        }
        None => database.get(path, id).cloned(),
    }
}

pub(crate) fn shallow_merge(target: &mut Document, partial: &Document) {
    for (key, value) in partial {
        target.insert(key.clone(), value.clone());
    }
}
