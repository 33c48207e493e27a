//! The cache state tree.
//!
//! A [`CacheState`] is an immutable value: the reducer produces a new one per
//! event and untouched branches stay shared with the previous state, so a
//! snapshot held by a reader never changes underneath it.

use serde::{Deserialize, Serialize};

use crate::pipeline::Pipeline;
use crate::registry::QueryRegistry;
use crate::store::{merged_document, DocumentStore, OverrideLayer};
use crate::types::{CollectionPath, Document, DocumentId, QueryResult};

/// `{ database, databaseOverrides, queries }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheState {
    pub database: DocumentStore,
    pub database_overrides: OverrideLayer,
    pub queries: QueryRegistry,
}

impl CacheState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the confirmed document with any pending override applied.
    pub fn get_document(&self, path: &CollectionPath, id: &DocumentId) -> Option<Document> {
        merged_document(&self.database, &self.database_overrides, path, id)
    }

    /// Returns the outbound view of a query entry.
    pub fn get_query_result(&self, alias: &str) -> Option<QueryResult> {
        self.queries.get(alias).map(QueryResult::from)
    }

    /// Returns the shaped documents of a query (fields and populates applied).
    pub fn query_documents(&self, alias: &str) -> Vec<Document> {
        let Some(entry) = self.queries.get(alias) else {
            return Vec::new();
        };
        Pipeline::build(&self.database_overrides, entry)
            .run(&self.database)
            .into_iter()
            .filter_map(|row| row.doc.map(|doc| doc.as_ref().clone()))
            .collect()
    }

    /// Re-materializes one entry. Returns true if it changed.
    pub fn recompute(&mut self, alias: &str) -> bool {
        self.queries
            .recompute(alias, &self.database, &self.database_overrides)
            .is_some()
    }

    /// Re-materializes every entry a change in `path` can affect.
    pub fn refresh_collection(&mut self, path: &CollectionPath) -> Vec<String> {
        self.queries
            .aliases_touching(path)
            .into_iter()
            .filter(|alias| self.recompute(alias))
            .collect()
    }

    /// Re-materializes every entry.
    pub fn refresh_all(&mut self) {
        let aliases: Vec<String> = self.queries.aliases().map(str::to_string).collect();
        for alias in aliases {
            self.recompute(&alias);
        }
    }
}
