//! Scenario tests for the optimistic cache.
//!
//! - `optimistic_reads.rs`  - Local resolution before the server answers
//! - `optimistic_writes.rs` - Speculative writes moving documents between queries
//! - `confirmations.rs`     - Document added / modified / removed confirmations
//! - `listeners.rs`         - Attach and detach, with and without preserve
//! - `mutations.rs`         - Writes, batches, transactions and rollback
//! - `laws.rs`              - Algebraic properties of the reducer
//! - `side_effects.rs`      - Engine notifications

mod optimistic_reads;
mod optimistic_writes;

use serde_json::{json, Value};

use crate::reader::CacheReader;
use crate::side_effect::RecordingSink;
use crate::snapshot::CacheState;
use crate::types::{Document, OrderedKey, Via};
use crate::{Cache, CacheReducer, SideEffect};

pub(crate) const COLLECTION: &str = "testCollection";

pub(crate) fn doc(value: Value) -> Document {
    value.as_object().cloned().expect("document must be an object")
}

pub(crate) fn key(id: &str) -> OrderedKey {
    (COLLECTION.into(), id.into())
}

/// Folds wire events through a default reducer.
pub(crate) fn run(state: &CacheState, events: &[Value]) -> CacheState {
    let reducer = CacheReducer::default();
    events
        .iter()
        .fold(state.clone(), |state, event| reducer.reduce_value(&state, event.clone()))
}

pub(crate) fn apply(state: &CacheState, event: Value) -> CacheState {
    run(state, &[event])
}

/// A `LISTENER_RESPONSE` carrying `docs` as both data and order.
pub(crate) fn listener_response(meta: Value, docs: &[Value]) -> Value {
    let data: serde_json::Map<String, Value> = docs
        .iter()
        .map(|d| (d["id"].as_str().unwrap_or_default().to_string(), d.clone()))
        .collect();
    json!({
        "type": "LISTENER_RESPONSE",
        "meta": meta,
        "payload": {"data": data, "ordered": docs, "fromCache": true},
    })
}

pub(crate) fn optimistic_added(id: &str, data: Value) -> Value {
    json!({
        "type": "OPTIMISTIC_ADDED",
        "meta": {"collection": COLLECTION, "doc": id},
        "payload": {"data": data},
    })
}

pub(crate) fn ordered(state: &CacheState, alias: &str) -> Vec<OrderedKey> {
    state
        .queries
        .get(alias)
        .map(|entry| entry.ordered.clone())
        .unwrap_or_default()
}

pub(crate) fn via(state: &CacheState, alias: &str) -> Option<Via> {
    state.queries.get(alias).map(|entry| entry.via)
}

/// Basic workflow test demonstrating core functionality.
#[test]
fn basic_workflow() {
    let cache = Cache::new(RecordingSink::new());
    let doc1 = json!({"key1": "value1", "id": "testDocId1", "path": COLLECTION});

    // Server answers a query
    cache
        .dispatch_json(
            &listener_response(
                json!({"collection": COLLECTION, "storeAs": "all", "where": [["key1", "==", "value1"]]}),
                &[doc1.clone()],
            )
            .to_string(),
        )
        .unwrap();
    assert_eq!(cache.get_query_result("all").unwrap().via, Via::Cache);

    // Speculative edit flips the result
    cache
        .dispatch_json(&optimistic_added("testDocId1", json!({"key1": "value2"})).to_string())
        .unwrap();
    let result = cache.get_query_result("all").unwrap();
    assert!(result.ordered.is_empty());
    assert_eq!(result.via, Via::Optimistic);
    assert_eq!(
        cache.get_document(&COLLECTION.into(), &"testDocId1".into()),
        Some(doc(json!({"key1": "value2", "id": "testDocId1", "path": COLLECTION})))
    );

    // Server confirms; speculation is gone
    cache
        .dispatch_json(
            &json!({
                "type": "DOCUMENT_MODIFIED",
                "meta": {"collection": COLLECTION, "doc": "testDocId1"},
                "payload": {"data": {"key1": "value2", "id": "testDocId1", "path": COLLECTION}},
            })
            .to_string(),
        )
        .unwrap();
    let state = cache.snapshot();
    assert!(state.database_overrides.is_empty());
    assert_eq!(via(&state, "all"), Some(Via::Cache));

    let effects = cache.sink().effects();
    assert!(matches!(effects[0], SideEffect::CollectionChanged { .. }));
    assert!(effects
        .iter()
        .any(|e| matches!(e, SideEffect::QueryUpdated { via: Via::Optimistic, .. })));
}
