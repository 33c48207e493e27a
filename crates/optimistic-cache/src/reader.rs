//! Read-side trait.
//!
//! Reads are pure: they never dispatch events or emit side-effects.

use crate::snapshot::CacheState;
use crate::types::{CollectionPath, Document, DocumentId, QueryResult};

/// Read access to cache state.
pub trait CacheReader {
    /// Returns the current state tree.
    fn snapshot(&self) -> CacheState;

    /// Returns a document with pending overrides applied.
    fn get_document(&self, path: &CollectionPath, id: &DocumentId) -> Option<Document>;

    /// Returns `{ ordered, ...descriptor, via }` for a query.
    fn get_query_result(&self, alias: &str) -> Option<QueryResult>;

    /// Returns the shaped documents of a query, in result order.
    fn query_documents(&self, alias: &str) -> Vec<Document>;
}

impl CacheReader for CacheState {
    fn snapshot(&self) -> CacheState {
        self.clone()
    }

    fn get_document(&self, path: &CollectionPath, id: &DocumentId) -> Option<Document> {
        CacheState::get_document(self, path, id)
    }

    fn get_query_result(&self, alias: &str) -> Option<QueryResult> {
        CacheState::get_query_result(self, alias)
    }

    fn query_documents(&self, alias: &str) -> Vec<Document> {
        CacheState::query_documents(self, alias)
    }
}
