//! Speculative writes moving documents in and out of query results.

use serde_json::{json, Value};

use super::{apply, key, listener_response, optimistic_added, ordered, run, via, COLLECTION};
use crate::snapshot::CacheState;
use crate::types::Via;

fn query(alias: &str, clause: Value) -> Value {
    json!({"collection": COLLECTION, "storeAs": alias, "where": [clause]})
}

fn numbered(id: &str, key1: Value) -> Value {
    json!({"key1": key1, "id": id, "path": COLLECTION})
}

/// Seeds `testOne` with a confirmed document and `testTwo` empty, then flips the
/// document with a speculative write.
fn moves(first_clause: Value, second_clause: Value, before: Value, after: Value) -> [CacheState; 2] {
    let seeded = run(
        &CacheState::new(),
        &[
            listener_response(query("testOne", first_clause), &[numbered("testDocId1", before)]),
            listener_response(query("testTwo", second_clause), &[]),
        ],
    );
    let moved = apply(&seeded, optimistic_added("testDocId1", numbered("testDocId1", after)));
    [seeded, moved]
}

fn assert_moved(seeded: &CacheState, moved: &CacheState) {
    assert_eq!(ordered(seeded, "testOne"), vec![key("testDocId1")]);
    assert_eq!(via(seeded, "testOne"), Some(Via::Cache));
    assert!(ordered(seeded, "testTwo").is_empty());
    assert_eq!(via(seeded, "testTwo"), Some(Via::Cache));

    assert!(ordered(moved, "testOne").is_empty());
    assert_eq!(via(moved, "testOne"), Some(Via::Optimistic));
    assert_eq!(ordered(moved, "testTwo"), vec![key("testDocId1")]);
    assert_eq!(via(moved, "testTwo"), Some(Via::Optimistic));
}

#[test]
fn disjoint_range_queries_swap_document() {
    let [seeded, moved] = moves(
        json!(["key1", "<=", 1]),
        json!(["key1", ">=", 2]),
        json!(1),
        json!(2),
    );
    assert_moved(&seeded, &moved);
    assert_eq!(seeded.database, moved.database);
}

#[test]
fn strict_range_queries_swap_document() {
    let [seeded, moved] = moves(
        json!(["key1", "<", 2]),
        json!(["key1", ">", 1]),
        json!(1),
        json!(2),
    );
    assert_moved(&seeded, &moved);
}

#[test]
fn not_equal_swaps_document() {
    let [seeded, moved] = moves(
        json!(["key1", "!=", 2]),
        json!(["key1", ">", 1]),
        json!(1),
        json!(2),
    );
    assert_moved(&seeded, &moved);
}

#[test]
fn membership_swaps_document() {
    let [seeded, moved] = moves(
        json!(["key1", "in", ["value1"]]),
        json!(["key1", "==", "value2"]),
        json!("value1"),
        json!("value2"),
    );
    assert_moved(&seeded, &moved);
}

#[test]
fn nested_array_fields_swap_document() {
    let [seeded, moved] = moves(
        json!(["key1.val", "array-contains", 1]),
        json!(["key1.val", "array-contains-any", [2]]),
        json!({"val": [1]}),
        json!({"val": [2]}),
    );
    assert_moved(&seeded, &moved);
}

#[test]
fn unchanged_result_stays_cache() {
    let first = numbered("testDocId1", json!(1));
    let seeded = run(
        &CacheState::new(),
        &[
            listener_response(query("notTwo", json!(["key1", "not-in", [2]])), &[first.clone()]),
            listener_response(query("isIdMatch", json!(["__name__", "==", "testDocId1"])), &[first]),
        ],
    );
    let moved = apply(&seeded, optimistic_added("testDocId1", numbered("testDocId1", json!(2))));

    assert!(ordered(&moved, "notTwo").is_empty());
    assert_eq!(via(&moved, "notTwo"), Some(Via::Optimistic));
    assert_eq!(ordered(&moved, "isIdMatch"), vec![key("testDocId1")]);
    assert_eq!(via(&moved, "isIdMatch"), Some(Via::Cache));
}

#[test]
fn override_pulls_document_into_filter() {
    let a = numbered("A", json!(1));
    let b = numbered("B", json!(3));
    let seeded = apply(
        &CacheState::new(),
        listener_response(query("lessThanTwo", json!(["key1", "<", 2])), &[a, b]),
    );
    // no overrides: the confirmed order is trusted verbatim
    assert_eq!(ordered(&seeded, "lessThanTwo"), vec![key("A"), key("B")]);

    let edited = apply(&seeded, optimistic_added("B", json!({"key1": 1})));
    assert_eq!(ordered(&edited, "lessThanTwo"), vec![key("A"), key("B")]);
    assert_eq!(via(&edited, "lessThanTwo"), Some(Via::Cache));
}

#[test]
fn override_adds_to_unfiltered_order() {
    let doc1 = json!({"key1": "value1", "id": "testDocId1", "path": COLLECTION});
    let seeded = apply(
        &CacheState::new(),
        listener_response(query("testStoreAs", json!(["key1", "==", "value1"])), &[doc1]),
    );
    let added = apply(
        &seeded,
        optimistic_added("testDocId2", json!({"key1": "value1", "id": "testDocId2", "path": COLLECTION})),
    );
    assert_eq!(ordered(&seeded, "testStoreAs"), vec![key("testDocId1")]);
    assert_eq!(
        ordered(&added, "testStoreAs"),
        vec![key("testDocId1"), key("testDocId2")]
    );
    assert_eq!(
        serde_json::to_value(&added.database_overrides).unwrap(),
        json!({COLLECTION: {"testDocId2": {"key1": "value1", "id": "testDocId2", "path": COLLECTION}}})
    );
}

#[test]
fn optimistic_remove_undoes_pending_write() {
    let doc1 = json!({"key1": "value1", "id": "testDocId1", "path": COLLECTION});
    let mut doc2 = doc1.clone();
    doc2["key2"] = json!("other");

    let written = run(
        &CacheState::new(),
        &[
            listener_response(query("testStoreAs", json!(["key1", "==", "value1"])), &[doc1]),
            optimistic_added("testDocId1", doc2),
        ],
    );
    assert_eq!(
        serde_json::to_value(&written.database_overrides).unwrap(),
        json!({COLLECTION: {"testDocId1": {
            "id": "testDocId1",
            "key1": "value1",
            "key2": "other",
            "path": COLLECTION,
        }}})
    );

    let removed = apply(
        &written,
        json!({
            "type": "OPTIMISTIC_REMOVED",
            "meta": {"collection": COLLECTION, "doc": "testDocId1"},
            "payload": {},
        }),
    );
    assert_eq!(serde_json::to_value(&removed.database_overrides).unwrap(), json!({}));
    assert_eq!(ordered(&removed, "testStoreAs"), vec![key("testDocId1")]);
    assert_eq!(via(&removed, "testStoreAs"), Some(Via::Cache));
}

#[test]
fn optimistic_remove_tombstones_confirmed_document() {
    let doc1 = json!({"key1": "value1", "id": "testDocId1", "path": COLLECTION});
    let seeded = apply(
        &CacheState::new(),
        listener_response(query("testStoreAs", json!(["key1", "==", "value1"])), &[doc1]),
    );
    let removed = apply(
        &seeded,
        json!({
            "type": "OPTIMISTIC_REMOVED",
            "meta": {"collection": COLLECTION, "doc": "testDocId1"},
        }),
    );
    assert!(ordered(&removed, "testStoreAs").is_empty());
    assert_eq!(via(&removed, "testStoreAs"), Some(Via::Optimistic));
    assert!(removed
        .get_document(&COLLECTION.into(), &"testDocId1".into())
        .is_none());
    assert!(removed
        .database
        .get(&COLLECTION.into(), &"testDocId1".into())
        .is_some());
}
