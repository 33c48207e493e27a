//! The reconciliation reducer: `reduce(state, event) -> state'`.
//!
//! Each arm edits a clone of the incoming state (cheap: every level is
//! `Arc`-shared) and then re-materializes the queries whose collections it
//! touched. The incoming state is never modified.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::event::{Completion, Event, ReorderHint};
use crate::mutation::{apply_write, Mutation};
use crate::snapshot::CacheState;
use crate::types::{
    CollectionPath, Document, DocumentId, OrderedKey, QueryDescriptor, QueryEntry, Via,
};
use crate::CacheError;

/// Reducer behaviour switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReducerOptions {
    /// Keep a query's results when its listener detaches without saying.
    #[serde(default)]
    pub preserve_cache_after_unset: bool,
}

/// Applies events to cache states.
#[derive(Debug, Clone, Default)]
pub struct CacheReducer {
    options: ReducerOptions,
}

impl CacheReducer {
    pub fn new(options: ReducerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> ReducerOptions {
        self.options
    }

    /// Returns the state after `event`.
    pub fn reduce(&self, state: &CacheState, event: Event) -> CacheState {
        debug!(kind = event.kind(), "reducing event");
        let mut next = state.clone();
        match event {
            Event::ListenerResponse {
                query,
                data,
                ordered,
                from_cache,
            } => {
                debug!(alias = %query.alias(), rows = ordered.len(), from_cache, "listener response");
                self.listener_response(&mut next, query, data, ordered);
            }
            Event::ListenerAttached { query } => self.listener_attached(&mut next, query),
            Event::ListenerDetached {
                query,
                preserve_cache,
            } => {
                let preserve = preserve_cache.unwrap_or(self.options.preserve_cache_after_unset);
                self.listener_detached(&mut next, &query, preserve);
            }
            Event::DocumentChanged {
                query,
                doc,
                data,
                reorder,
            } => self.document_changed(&mut next, &query, doc, data, reorder),
            Event::DocumentRemoved { query, doc } => {
                let key = (query.collection.clone(), doc);
                next.database.remove(&key.0, &key.1);
                next.database_overrides.remove(&key.0, &key.1);
                next.queries.forget(&key);
                next.refresh_collection(&key.0);
            }
            Event::OptimisticWrite {
                collection,
                doc,
                data,
            } => {
                next.database_overrides.merge(&collection, &doc, &data);
                next.refresh_collection(&collection);
            }
            Event::OptimisticRemove { collection, doc } => {
                // Removing a pending speculative write undoes it.
                if next.database_overrides.get(&collection, &doc).is_some() {
                    next.database_overrides.remove(&collection, &doc);
                } else {
                    next.database_overrides.tombstone(&collection, &doc);
                }
                next.refresh_collection(&collection);
            }
            Event::MutationStart {
                mutation,
                timestamp,
                completion,
            } => {
                return self.mutation_start(state, next, &mutation, &timestamp, completion);
            }
            Event::MutationFailed {
                targets,
                error,
                completion,
            } => {
                warn!(targets = targets.len(), %error, "mutation failed, rolling back");
                let mut paths: Vec<CollectionPath> = Vec::new();
                for (path, id) in &targets {
                    next.database_overrides.remove(path, id);
                    if !paths.contains(path) {
                        paths.push(path.clone());
                    }
                }
                for path in &paths {
                    next.refresh_collection(path);
                }
                if let Some(completion) = completion {
                    completion.reject(CacheError::MutationFailed(error));
                }
            }
        }
        next
    }

    /// Parses and applies a wire event. A malformed event leaves the state unchanged.
    pub fn reduce_value(&self, state: &CacheState, value: Value) -> CacheState {
        match Event::from_value(value) {
            Ok(event) => self.reduce(state, event),
            Err(err) => {
                warn!(error = %err, "ignoring malformed event");
                state.clone()
            }
        }
    }

    fn listener_response(
        &self,
        next: &mut CacheState,
        query: QueryDescriptor,
        data: Option<IndexMap<DocumentId, Document>>,
        ordered: Vec<OrderedKey>,
    ) {
        let alias = query.alias();
        let mut paths = vec![query.collection.clone()];
        for (id, doc) in data.into_iter().flatten() {
            let path = doc_path(&doc, &query.collection);
            next.database.insert(&path, &id, with_identity(doc, &path, &id));
            if !paths.contains(&path) {
                paths.push(path);
            }
        }

        match next.queries.entry_mut(&alias) {
            Some(entry) => {
                entry.query = query;
                entry.confirmed = Some(ordered.clone());
                entry.ordered = ordered;
                entry.via = Via::Cache;
                entry.live = true;
            }
            None => next
                .queries
                .register(alias.clone(), QueryEntry::confirmed(query, ordered)),
        }

        next.recompute(&alias);
        for path in &paths {
            next.refresh_collection(path);
        }
    }

    /// A fresh listener waits for its own first response; until then the
    /// entry is resolved from memory.
    fn listener_attached(&self, next: &mut CacheState, query: QueryDescriptor) {
        let alias = query.alias();
        next.queries.register(alias.clone(), QueryEntry::pending(query));
        next.recompute(&alias);
    }

    fn listener_detached(&self, next: &mut CacheState, query: &QueryDescriptor, preserve: bool) {
        let alias = query.alias();
        if !next.queries.contains(&alias) {
            debug!(%alias, "detach for unknown query");
            return;
        }
        let orphans = next.queries.unregister(&alias, preserve);
        debug!(%alias, preserve, collected = orphans.len(), "listener detached");
        for (path, id) in &orphans {
            next.database.remove(path, id);
        }
        next.refresh_collection(&query.collection);
    }

    fn document_changed(
        &self,
        next: &mut CacheState,
        query: &QueryDescriptor,
        doc: DocumentId,
        data: Document,
        reorder: Option<ReorderHint>,
    ) {
        let path = doc_path(&data, &query.collection);
        let id = data
            .get("id")
            .and_then(Value::as_str)
            .map(DocumentId::from)
            .unwrap_or(doc);
        next.database.insert(&path, &id, with_identity(data, &path, &id));
        next.database_overrides.remove(&path, &id);

        let alias = query.alias();
        if let Some(hint) = reorder.filter(|h| h.new_index >= 0 && h.new_index != h.old_index) {
            if let Some(entry) = next.queries.entry_mut(&alias) {
                // The old position is not vacated; the key is only inserted.
                let mut confirmed = entry
                    .confirmed
                    .take()
                    .unwrap_or_else(|| entry.ordered.clone());
                let at = usize::try_from(hint.new_index)
                    .unwrap_or(usize::MAX)
                    .min(confirmed.len());
                confirmed.insert(at, (path.clone(), id.clone()));
                entry.confirmed = Some(confirmed);
            }
        }

        next.recompute(&alias);
        next.refresh_collection(&path);
    }

    fn mutation_start(
        &self,
        state: &CacheState,
        mut next: CacheState,
        mutation: &Mutation,
        timestamp: &Value,
        completion: Option<Completion>,
    ) -> CacheState {
        let writes = match mutation.resolve(&state.database) {
            Ok(writes) => writes,
            Err(err) => {
                warn!(error = %err, "rejecting mutation");
                if let Some(completion) = completion {
                    completion.reject(err);
                }
                return state.clone();
            }
        };

        let mut paths: Vec<CollectionPath> = Vec::new();
        for write in &writes {
            let prior = next.get_document(&write.path, &write.id);
            let patch = apply_write(write, prior.as_ref(), timestamp);
            next.database_overrides.merge(&write.path, &write.id, &patch);
            if !paths.contains(&write.path) {
                paths.push(write.path.clone());
            }
        }
        debug!(writes = writes.len(), "mutation applied optimistically");
        for path in &paths {
            next.refresh_collection(path);
        }
        if let Some(completion) = completion {
            completion.resolve();
        }
        next
    }
}

/// Applies one event with default options.
pub fn reduce(state: &CacheState, event: Event) -> CacheState {
    CacheReducer::default().reduce(state, event)
}

fn doc_path(doc: &Document, fallback: &CollectionPath) -> CollectionPath {
    doc.get("path")
        .and_then(Value::as_str)
        .map(CollectionPath::from)
        .unwrap_or_else(|| fallback.clone())
}

/// Ensures the `id` and `path` identity fields are present.
fn with_identity(mut doc: Document, path: &CollectionPath, id: &DocumentId) -> Document {
    doc.entry("id")
        .or_insert_with(|| Value::String(id.to_string()));
    doc.entry("path")
        .or_insert_with(|| Value::String(path.to_string()));
    doc
}
