//! # Optimistic Cache
//!
//! A synchronous, query-aware document cache that mirrors a remote document
//! database and keeps live query results instantly consistent while writes
//! are still in flight.
//!
//! ## Principles
//!
//! - **Confirmed data and speculation live apart** - the confirmed database
//!   changes only on server confirmation; speculative writes sit in an
//!   override layer until confirmed or rolled back
//! - **Reduction is pure** - `reduce(state, event)` returns a new state and
//!   leaves the old one intact
//! - **Trust the server when nothing is pending** - a query without pending
//!   overrides replays the server's order verbatim
//! - **Side-effects describe published state** - emitted after the new
//!   snapshot is visible
//!
//! ## Architecture
//!
//! ```text
//! EVENT:
//!   wire JSON → Event → reducer → store / overrides / registry → recompute
//!
//! RECOMPUTE:
//!   pipeline = [populate?] collection (ids | overrides filter sort cursor limit) [fields?]
//!
//! ENGINE:
//!   dispatch → publish snapshot → side-effects
//! ```
//!
//! ## Example
//!
//! ```rust
//! use optimistic_cache::{Cache, CacheReader, RecordingSink, Via};
//! use serde_json::json;
//!
//! let cache = Cache::new(RecordingSink::new());
//!
//! cache
//!     .dispatch_json(
//!         &json!({
//!             "type": "LISTENER_RESPONSE",
//!             "meta": {"collection": "todos", "storeAs": "all"},
//!             "payload": {
//!                 "data": {"a": {"id": "a", "path": "todos", "done": false}},
//!                 "ordered": [["todos", "a"]],
//!             },
//!         })
//!         .to_string(),
//!     )
//!     .unwrap();
//!
//! let result = cache.get_query_result("all").unwrap();
//! assert_eq!(result.via, Via::Cache);
//! assert_eq!(result.ordered.len(), 1);
//! assert!(!cache.sink().is_empty());
//! ```
//!
//! ## Crate Structure
//!
//! - [`Cache`] - The engine
//! - [`reducer`] - The reconciliation reducer
//! - [`event`] - Inbound events and their wire form
//! - [`mutation`] - Writes, batches, transactions and sentinels
//! - [`registry`] - Query entries and their materialization
//! - [`pipeline`] / [`stages`] - Query re-evaluation
//! - [`store`] - Confirmed database and override layer
//! - [`comparator`] - Operators and value ordering
//! - [`snapshot`] - The state tree
//! - [`reader`] - Read-side trait
//! - [`side_effect`] - Change notifications

mod cache;
pub mod comparator;
pub mod event;
pub mod mutation;
pub mod path;
pub mod pipeline;
pub mod reader;
pub mod reducer;
pub mod registry;
pub mod side_effect;
pub mod snapshot;
pub mod stages;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use crate::cache::Cache;
pub use comparator::Operator;
pub use event::{Completion, Event, EventKind, ReorderHint, WireEvent};
pub use mutation::{apply_write, FieldValue, Mutation, Read, Transaction, Write};
pub use pipeline::Pipeline;
pub use reader::CacheReader;
pub use reducer::{reduce, CacheReducer, ReducerOptions};
pub use registry::QueryRegistry;
pub use side_effect::{NullSink, RecordingSink, SideEffect, SideEffectSink};
pub use snapshot::CacheState;
pub use store::{DocumentStore, OverrideLayer};
pub use types::{
    Collection, CollectionPath, Direction, Document, DocumentId, OrderBy, OrderedKey, Populate,
    QueryDescriptor, QueryEntry, QueryResult, Via, WhereClause,
};

/// Errors that can occur in the cache.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// An event was missing required fields or could not be parsed.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// A transaction tried to read a query.
    #[error("transaction reads must be documents: {0}")]
    TransactionQuery(String),

    /// The server rejected a mutation.
    #[error("mutation failed: {0}")]
    MutationFailed(String),
}
