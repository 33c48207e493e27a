//! The cache engine: holds the current snapshot and dispatches events.
//!
//! # Dispatch path (strict order)
//!
//! 1. Reduce the current snapshot with the event
//! 2. Publish the new snapshot to readers
//! 3. Emit side-effects for what changed
//!
//! Dispatches are serialized, so side-effects arrive in delivery order.
//! Readers clone the published snapshot and never block each other.
//!
//! # Restore (silent)
//!
//! [`Cache::from_state`] publishes a saved state without emitting anything.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::event::Event;
use crate::reader::CacheReader;
use crate::reducer::{CacheReducer, ReducerOptions};
use crate::side_effect::{SideEffect, SideEffectSink};
use crate::snapshot::CacheState;
use crate::types::{CollectionPath, Document, DocumentId, QueryResult};
use crate::CacheError;

/// The optimistic cache engine.
pub struct Cache<S: SideEffectSink> {
    reducer: CacheReducer,
    state: RwLock<CacheState>,
    /// Serializes dispatch; held across reduce and emit.
    dispatch: Mutex<()>,
    sink: Arc<S>,
}

impl<S: SideEffectSink> Cache<S> {
    /// Creates an empty cache with default options.
    pub fn new(sink: S) -> Self {
        Self::with_options(ReducerOptions::default(), sink)
    }

    pub fn with_options(options: ReducerOptions, sink: S) -> Self {
        Self::from_state(CacheState::new(), options, sink)
    }

    /// Restores a cache from a saved state. Emits no side-effects.
    pub fn from_state(state: CacheState, options: ReducerOptions, sink: S) -> Self {
        tracing::debug!(queries = state.queries.len(), "cache: restoring state");
        Self {
            reducer: CacheReducer::new(options),
            state: RwLock::new(state),
            dispatch: Mutex::new(()),
            sink: Arc::new(sink),
        }
    }

    /// Returns a reference to the side-effect sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn options(&self) -> ReducerOptions {
        self.reducer.options()
    }

    /// Applies an event and returns the new snapshot.
    pub fn dispatch(&self, event: Event) -> CacheState {
        let _serial = self.dispatch.lock();
        let previous = self.state.read().clone();
        let next = self.reducer.reduce(&previous, event);
        *self.state.write() = next.clone();

        for effect in diff(&previous, &next) {
            self.sink.emit(effect);
        }
        next
    }

    /// Parses a wire event and applies it.
    ///
    /// A malformed event is reported and the state is left unchanged.
    pub fn dispatch_json(&self, text: &str) -> Result<CacheState, CacheError> {
        match Event::from_json(text) {
            Ok(event) => Ok(self.dispatch(event)),
            Err(err) => {
                tracing::warn!(error = %err, "cache: ignoring malformed event");
                Err(err)
            }
        }
    }
}

impl<S: SideEffectSink> CacheReader for Cache<S> {
    fn snapshot(&self) -> CacheState {
        self.state.read().clone()
    }

    fn get_document(&self, path: &CollectionPath, id: &DocumentId) -> Option<Document> {
        self.state.read().get_document(path, id)
    }

    fn get_query_result(&self, alias: &str) -> Option<QueryResult> {
        self.state.read().get_query_result(alias)
    }

    fn query_documents(&self, alias: &str) -> Vec<Document> {
        self.state.read().query_documents(alias)
    }
}

/// Side-effects describing the change from `previous` to `next`.
fn diff(previous: &CacheState, next: &CacheState) -> Vec<SideEffect> {
    let mut effects = Vec::new();

    let mut paths: Vec<&CollectionPath> = Vec::new();
    for path in previous
        .database
        .paths()
        .chain(next.database.paths())
        .chain(previous.database_overrides.paths())
        .chain(next.database_overrides.paths())
    {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    for path in paths {
        let confirmed_changed = previous.database.collection(path) != next.database.collection(path);
        let overrides_changed = previous.database_overrides.collection(path)
            != next.database_overrides.collection(path);
        if confirmed_changed || overrides_changed {
            effects.push(SideEffect::CollectionChanged {
                collection: path.clone(),
            });
        }
    }

    for (alias, entry) in next.queries.iter() {
        if previous.queries.get(alias) != Some(entry) {
            effects.push(SideEffect::QueryUpdated {
                alias: alias.to_string(),
                via: entry.via,
            });
        }
    }
    for alias in previous.queries.aliases() {
        if !next.queries.contains(alias) {
            effects.push(SideEffect::QueryRemoved {
                alias: alias.to_string(),
            });
        }
    }

    effects
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::side_effect::{NullSink, RecordingSink};
    use crate::types::{QueryDescriptor, QueryEntry};

    #[test]
    fn restore_is_silent() {
        let mut state = CacheState::new();
        state.queries.register(
            "all",
            QueryEntry::pending(QueryDescriptor::new("todos")),
        );
        let cache = Cache::from_state(
            state.clone(),
            ReducerOptions::default(),
            RecordingSink::new(),
        );
        assert!(cache.sink().is_empty());
        assert_eq!(cache.snapshot(), state);
    }

    #[test]
    fn malformed_json_leaves_state() {
        let cache = Cache::new(NullSink);
        assert!(cache.dispatch_json("{}").is_err());
        assert_eq!(cache.snapshot(), CacheState::new());
    }

    #[test]
    fn diff_of_identical_states_is_empty() {
        let state = CacheState::new();
        assert!(diff(&state, &state.clone()).is_empty());
    }
}
