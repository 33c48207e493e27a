//! Local resolution of queries before the server answers.

use serde_json::{json, Value};

use super::{apply, doc, key, listener_response, ordered, run, via, COLLECTION};
use crate::snapshot::CacheState;
use crate::types::{QueryResult, Via};

fn dated(id: &str, seconds: i64, other: &str) -> Value {
    json!({
        "dateKey": {"seconds": seconds, "nanoseconds": seconds},
        "id": id,
        "other": other,
        "path": COLLECTION,
    })
}

fn doc0() -> Value {
    dated("testDocId0", 0, "first")
}

fn doc1() -> Value {
    dated("testDocId1", 1, "second")
}

fn doc3() -> Value {
    dated("testDocId3", 3, "third")
}

fn doc4() -> Value {
    dated("testDocId4", 4, "fourth")
}

/// A state whose database already holds four dated documents.
fn primed() -> CacheState {
    let mut state = CacheState::new();
    for d in [doc0(), doc1(), doc3(), doc4()] {
        let id = d["id"].as_str().unwrap().to_string();
        state.database.insert(&COLLECTION.into(), &id.into(), doc(d));
    }
    state
}

fn set_listener(meta: Value) -> Value {
    json!({"type": "SET_LISTENER", "meta": meta, "payload": {}})
}

fn date_query(where_clause: Value) -> Value {
    json!({
        "collection": COLLECTION,
        "storeAs": "testStoreAs2",
        "where": [where_clause],
        "orderBy": ["dateKey"],
    })
}

fn seed_dates(docs: &[Value]) -> CacheState {
    apply(
        &CacheState::new(),
        listener_response(
            date_query(json!(["dateKey", "<", {"seconds": 0, "nanoseconds": 1}])),
            docs,
        ),
    )
}

#[test]
fn set_listener_with_nothing_in_memory() {
    let state = apply(
        &CacheState::new(),
        set_listener(json!({
            "collection": COLLECTION,
            "storeAs": "testStoreAs",
            "where": [["key1", "==", "value1"]],
            "orderBy": ["key1"],
        })),
    );
    assert!(ordered(&state, "testStoreAs").is_empty());
    assert_eq!(via(&state, "testStoreAs"), Some(Via::Memory));
    assert!(state.queries.get("testStoreAs").unwrap().live);
}

#[test]
fn set_listener_returns_data_in_memory() {
    let doc1 = json!({"key1": "value1", "other": "test", "id": "testDocId1", "path": COLLECTION});
    let state = run(
        &CacheState::new(),
        &[
            listener_response(
                json!({
                    "collection": COLLECTION,
                    "storeAs": "testStoreAs",
                    "where": [["key1", "==", "value1"]],
                    "orderBy": ["key1"],
                }),
                &[doc1],
            ),
            set_listener(json!({
                "collection": COLLECTION,
                "storeAs": "testStoreAs2",
                "where": [["other", "==", "test"]],
                "orderBy": ["key1"],
            })),
        ],
    );
    assert_eq!(ordered(&state, "testStoreAs2"), vec![key("testDocId1")]);
    assert_eq!(via(&state, "testStoreAs2"), Some(Via::Memory));
}

#[test]
fn set_listener_filters_timestamps() {
    let cases = [
        (json!(["dateKey", "<", {"seconds": 0, "nanoseconds": 1}]), vec!["testDocId0"]),
        (json!(["dateKey", ">", {"seconds": 0, "nanoseconds": 1}]), vec!["testDocId1", "testDocId3"]),
        (json!(["dateKey", "<=", {"seconds": 1, "nanoseconds": 1}]), vec!["testDocId0", "testDocId1"]),
        (json!(["dateKey", ">=", {"seconds": 1, "nanoseconds": 1}]), vec!["testDocId1", "testDocId3"]),
        (json!(["dateKey", "==", {"seconds": 1, "nanoseconds": 1}]), vec!["testDocId1"]),
    ];
    let seeded = seed_dates(&[doc0(), doc1(), doc3()]);

    for (clause, expected) in cases {
        let state = apply(&seeded, set_listener(date_query(clause.clone())));
        let ids: Vec<_> = ordered(&state, "testStoreAs2")
            .into_iter()
            .map(|(_, id)| id.to_string())
            .collect();
        assert_eq!(ids, expected, "clause {clause}");
    }
}

#[test]
fn set_listener_discards_previous_confirmation() {
    let seeded = seed_dates(&[doc0(), doc1()]);
    assert_eq!(ordered(&seeded, "testStoreAs2").len(), 2);
    assert_eq!(via(&seeded, "testStoreAs2"), Some(Via::Cache));

    let state = apply(
        &seeded,
        set_listener(date_query(json!(["dateKey", "<", {"seconds": 0, "nanoseconds": 1}]))),
    );
    assert_eq!(ordered(&state, "testStoreAs2"), vec![key("testDocId0")]);
    assert_eq!(via(&state, "testStoreAs2"), Some(Via::Memory));
}

fn paginate(order_by: Value, cursor: &str) -> QueryResult {
    let mut meta = json!({
        "collection": COLLECTION,
        "storeAs": "testStoreAs",
        "orderBy": order_by,
        "limit": 2,
    });
    meta[cursor] = json!({"seconds": 2, "nanoseconds": 2});
    let state = apply(&primed(), set_listener(meta));
    state.get_query_result("testStoreAs").unwrap()
}

fn ids(result: &QueryResult) -> Vec<String> {
    result.ordered.iter().map(|(_, id)| id.to_string()).collect()
}

#[test]
fn pagination_start_at() {
    let desc = paginate(json!(["dateKey", "desc"]), "startAt");
    assert_eq!(ids(&desc), vec!["testDocId1", "testDocId0"]);
    assert_eq!(desc.via, Via::Memory);
    assert_eq!(desc.query.limit, Some(2));

    let asc = paginate(json!(["dateKey"]), "startAt");
    assert_eq!(ids(&asc), vec!["testDocId3", "testDocId4"]);
}

#[test]
fn pagination_start_after() {
    let desc = paginate(json!(["dateKey", "desc"]), "startAfter");
    assert_eq!(ids(&desc), vec!["testDocId1", "testDocId0"]);

    let asc = paginate(json!(["dateKey", "asc"]), "startAfter");
    assert_eq!(ids(&asc), vec!["testDocId3", "testDocId4"]);
}

#[test]
fn pagination_end_at() {
    let desc = paginate(json!(["dateKey", "desc"]), "endAt");
    assert_eq!(ids(&desc), vec!["testDocId4", "testDocId3"]);

    let asc = paginate(json!(["dateKey", "asc"]), "endAt");
    assert_eq!(ids(&asc), vec!["testDocId0", "testDocId1"]);
}

#[test]
fn pagination_end_before() {
    let desc = paginate(json!(["dateKey", "desc"]), "endBefore");
    assert_eq!(ids(&desc), vec!["testDocId4", "testDocId3"]);

    let asc = paginate(json!(["dateKey"]), "endBefore");
    assert_eq!(ids(&asc), vec!["testDocId0", "testDocId1"]);
}

#[test]
fn query_result_serializes_flat() {
    let result = paginate(json!(["dateKey", "desc"]), "startAt");
    assert_eq!(
        serde_json::to_value(&result).unwrap(),
        json!({
            "ordered": [[COLLECTION, "testDocId1"], [COLLECTION, "testDocId0"]],
            "collection": COLLECTION,
            "storeAs": "testStoreAs",
            "orderBy": [["dateKey", "desc"]],
            "limit": 2,
            "startAt": {"seconds": 2, "nanoseconds": 2},
            "via": "memory",
        })
    );
}

#[test]
fn null_payload_data_yields_empty_order() {
    let state = apply(
        &CacheState::new(),
        json!({
            "type": "LISTENER_RESPONSE",
            "meta": {"collection": COLLECTION, "storeAs": "testStoreAs", "where": ["abc", "===", 123]},
            "payload": {"data": null, "ordered": [], "fromCache": true},
        }),
    );
    assert_eq!(ordered(&state, "testStoreAs"), vec![]);
    assert_eq!(via(&state, "testStoreAs"), Some(Via::Cache));
}

#[test]
fn populate_joins_numeric_foreign_key() {
    let state = run(
        &CacheState::new(),
        &[
            listener_response(
                json!({"collection": "owners", "storeAs": "owners"}),
                &[json!({"id": "5", "path": "owners", "name": "Ada"})],
            ),
            listener_response(
                json!({
                    "collection": COLLECTION,
                    "storeAs": "withOwner",
                    "populates": [["owner", "owners", "ownerDoc"]],
                }),
                &[json!({"id": "testDocId1", "path": COLLECTION, "owner": 5})],
            ),
        ],
    );
    let docs = state.query_documents("withOwner");
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["ownerDoc"]["name"], json!("Ada"));
    assert_eq!(docs[0]["owner"], json!(5));
}
