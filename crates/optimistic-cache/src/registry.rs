//! The query registry: alias → entry.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::pipeline::Pipeline;
use crate::store::{DocumentStore, OverrideLayer};
use crate::types::{CollectionPath, OrderedKey, QueryEntry, Via};

/// Registered queries keyed by alias, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryRegistry {
    entries: Arc<IndexMap<String, Arc<QueryEntry>>>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, alias: &str) -> Option<&QueryEntry> {
        self.entries.get(alias).map(|entry| entry.as_ref())
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.entries.contains_key(alias)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryEntry)> + '_ {
        self.entries
            .iter()
            .map(|(alias, entry)| (alias.as_str(), entry.as_ref()))
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    /// Aliases whose result can change when `path` changes.
    pub fn aliases_touching(&self, path: &CollectionPath) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.query.touches(path))
            .map(|(alias, _)| alias.clone())
            .collect()
    }

    /// Registers or replaces an entry.
    pub fn register(&mut self, alias: impl Into<String>, entry: QueryEntry) {
        Arc::make_mut(&mut self.entries).insert(alias.into(), Arc::new(entry));
    }

    /// Mutable access to one entry; copies only that entry if shared.
    pub fn entry_mut(&mut self, alias: &str) -> Option<&mut QueryEntry> {
        if !self.entries.contains_key(alias) {
            return None;
        }
        Arc::make_mut(&mut self.entries)
            .get_mut(alias)
            .map(Arc::make_mut)
    }

    pub fn remove(&mut self, alias: &str) -> Option<QueryEntry> {
        if !self.entries.contains_key(alias) {
            return None;
        }
        Arc::make_mut(&mut self.entries)
            .shift_remove(alias)
            .map(Arc::unwrap_or_clone)
    }

    /// Whether any entry other than `except` lists the document.
    pub fn references(&self, key: &OrderedKey, except: Option<&str>) -> bool {
        self.entries
            .iter()
            .filter(|(alias, _)| Some(alias.as_str()) != except)
            .any(|(_, entry)| entry.references(key))
    }

    /// Strips a document from every entry's confirmed and materialized order.
    pub fn forget(&mut self, key: &OrderedKey) {
        let aliases: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.references(key))
            .map(|(alias, _)| alias.clone())
            .collect();
        for alias in aliases {
            if let Some(entry) = self.entry_mut(&alias) {
                entry.ordered.retain(|k| k != key);
                if let Some(confirmed) = entry.confirmed.as_mut() {
                    confirmed.retain(|k| k != key);
                }
            }
        }
    }

    /// Detaches a query.
    ///
    /// Preserving keeps the entry and clears `live`. Otherwise the entry is
    /// removed and the documents of its collection that it alone referenced
    /// are returned for garbage collection.
    pub fn unregister(&mut self, alias: &str, preserve: bool) -> Vec<OrderedKey> {
        if preserve {
            if let Some(entry) = self.entry_mut(alias) {
                entry.live = false;
            }
            return Vec::new();
        }
        let Some(entry) = self.remove(alias) else {
            return Vec::new();
        };
        let mut orphans: Vec<OrderedKey> = Vec::new();
        let listed = entry
            .ordered
            .iter()
            .chain(entry.confirmed.iter().flatten());
        for key in listed {
            if key.0 == entry.query.collection
                && !orphans.contains(key)
                && !self.references(key, None)
            {
                orphans.push(key.clone());
            }
        }
        orphans
    }

    /// Re-materializes one entry. Returns the new order when it changed.
    pub fn recompute(
        &mut self,
        alias: &str,
        database: &DocumentStore,
        overrides: &OverrideLayer,
    ) -> Option<Vec<OrderedKey>> {
        let entry = self.get(alias)?;
        let (ordered, via) = materialize(database, overrides, entry);
        if entry.ordered == ordered && entry.via == via {
            return None;
        }
        tracing::trace!(alias, via = via.as_str(), rows = ordered.len(), "recomputed query");
        let entry = self.entry_mut(alias)?;
        entry.ordered = ordered.clone();
        entry.via = via;
        Some(ordered)
    }
}

/// Computes an entry's `ordered` list and provenance from scratch.
pub fn materialize(
    database: &DocumentStore,
    overrides: &OverrideLayer,
    entry: &QueryEntry,
) -> (Vec<OrderedKey>, Via) {
    let collection = &entry.query.collection;
    match &entry.confirmed {
        Some(confirmed) if !overrides.has_overrides(collection) => {
            (confirmed.clone(), Via::Cache)
        }
        confirmed => {
            let ordered: Vec<OrderedKey> = Pipeline::build(overrides, entry)
                .run(database)
                .into_iter()
                .filter(|row| !row.is_hole())
                .map(|row| (collection.clone(), row.id))
                .collect();
            let via = match confirmed {
                None => Via::Memory,
                Some(confirmed) if *confirmed == ordered => Via::Cache,
                Some(_) => Via::Optimistic,
            };
            (ordered, via)
        }
    }
}
