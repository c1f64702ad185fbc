//! Integration tests for the normalized cache.

use horizon_lattice_link::{CacheSnapshot, LinkError, Operation, OperationCache, TypePolicies};
use serde_json::json;

fn runs_root() -> Operation {
    Operation::query("query RunsRoot { runs { __typename id status pipeline { __typename name } } }")
}

fn run_updates() -> Operation {
    Operation::subscription("subscription RunUpdates { runUpdated { __typename id status } }")
}

#[test]
fn test_subscription_write_updates_query_view() {
    let cache = OperationCache::new();
    cache
        .write(
            &runs_root(),
            &json!({"runs": [
                {"__typename": "Run", "id": "a", "status": "STARTED",
                 "pipeline": {"__typename": "Pipeline", "name": "etl"}},
                {"__typename": "Run", "id": "b", "status": "QUEUED",
                 "pipeline": {"__typename": "Pipeline", "name": "etl"}}
            ]}),
        )
        .expect("write succeeds");

    cache
        .write(
            &run_updates(),
            &json!({"runUpdated": {"__typename": "Run", "id": "a", "status": "SUCCESS"}}),
        )
        .expect("write succeeds");

    let runs = cache.read(&runs_root()).expect("cache hit");
    assert_eq!(runs["runs"][0]["status"], "SUCCESS");
    assert_eq!(runs["runs"][0]["pipeline"]["name"], "etl");
    assert_eq!(runs["runs"][1]["status"], "QUEUED");

    let update = cache.read(&run_updates()).expect("cache hit");
    assert_eq!(
        update,
        json!({"runUpdated": {"__typename": "Run", "id": "a", "status": "SUCCESS"}})
    );
}

#[test]
fn test_watchers_see_only_visible_changes() {
    let cache = OperationCache::new();
    let mut watcher = cache.watch();
    let data = json!({"runUpdated": {"__typename": "Run", "id": "a", "status": "STARTED"}});

    assert!(cache.write(&run_updates(), &data).expect("write succeeds"));
    assert!(watcher.has_changed().expect("cache alive"));
    watcher.mark_unchanged();

    assert!(!cache.write(&run_updates(), &data).expect("write succeeds"));
    assert!(!watcher.has_changed().expect("cache alive"));

    let version = cache.version();
    let malformed = json!({"runUpdated": {"__typename": 7, "id": "a"}});
    assert!(matches!(
        cache.write(&run_updates(), &malformed),
        Err(LinkError::CacheNormalization(_))
    ));
    assert_eq!(cache.version(), version);
    assert_eq!(cache.read(&run_updates()), Some(data));
}

#[test]
fn test_variables_are_part_of_the_identity() {
    let cache = OperationCache::new();
    let query = "query Run($id: ID!) { run(id: $id) { __typename id status } }";
    let a = Operation::query(query).variable("id", "a");
    let b = Operation::query(query).variable("id", "b");

    cache
        .write(&a, &json!({"run": {"__typename": "Run", "id": "a", "status": "STARTED"}}))
        .expect("write succeeds");

    assert!(cache.read(&a).is_some());
    assert!(cache.read(&b).is_none());
}

#[test]
fn test_operation_name_selects_the_cached_root() {
    let cache = OperationCache::new();
    let document = "query A { a } query B { b }";
    let a = Operation::query(document).operation_name("A");
    let b = Operation::query(document).operation_name("B");

    cache.write(&a, &json!({"a": 1})).expect("write succeeds");

    assert_eq!(cache.read(&a), Some(json!({"a": 1})));
    assert_eq!(cache.read(&b), None);
}

#[test]
fn test_type_policies_control_identity() {
    let policies = TypePolicies::new()
        .key_fields("Asset", ["namespace", "name"])
        .embedded("Metadata");
    let cache = OperationCache::with_policies(policies);
    let op = Operation::query("{ assets { __typename namespace name meta { __typename id } } }");

    cache
        .write(
            &op,
            &json!({"assets": [{
                "__typename": "Asset", "namespace": "core", "name": "orders",
                "meta": {"__typename": "Metadata", "id": "m1"}
            }]}),
        )
        .expect("write succeeds");

    assert_eq!(cache.len(), 1);
    // Key fields render in sorted order.
    let key = r#"Asset:{"name":"orders","namespace":"core"}"#;
    let record = cache.entity(key).expect("asset record");
    assert_eq!(record["meta"]["id"], "m1");

    let missing_key = json!({"assets": [{"__typename": "Asset", "name": "orders"}]});
    assert!(matches!(
        cache.write(&op, &missing_key),
        Err(LinkError::CacheNormalization(_))
    ));
}

#[test]
fn test_snapshot_seeds_another_cache() {
    let cache = OperationCache::new();
    cache
        .write(
            &run_updates(),
            &json!({"runUpdated": {"__typename": "Run", "id": "a", "status": "STARTED"}}),
        )
        .expect("write succeeds");

    let serialized = serde_json::to_string(&cache.extract()).expect("serialize snapshot");
    let snapshot: CacheSnapshot = serde_json::from_str(&serialized).expect("parse snapshot");
    assert_eq!(snapshot.len(), 1);

    let seeded = OperationCache::new();
    seeded.restore(snapshot);
    assert_eq!(seeded.read(&run_updates()), cache.read(&run_updates()));

    assert!(seeded.evict("Run:a"));
    assert!(seeded.read(&run_updates()).is_none());
    assert!(cache.read(&run_updates()).is_some());
}
