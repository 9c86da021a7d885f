mod fixtures;

use std::sync::Arc;

use rederive::{DeriveError, MemoryStorage, ResyncError, Storage, Updater};
use serde_json::json;

use fixtures::{cyclic_domain, deep_domain, doc, seed_thing, things_domain, FailingStorage};

// =============================================================================
// Aggregation correctness
// =============================================================================

#[tokio::test]
async fn update_persists_summed_derived_property() {
    let storage = Arc::new(MemoryStorage::new());
    seed_thing(&storage, "t1", &[7, 13]).await;

    let updater = Updater::new(things_domain(), storage.clone());
    updater.update("t1").await.unwrap();

    let thing = storage
        .find_one("things", &rederive::id_filter("t1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(thing["_D"], json!({"total_weight": 20}));
}

#[tokio::test]
async fn update_reflects_data_changes_on_rerun() {
    let storage = Arc::new(MemoryStorage::new());
    seed_thing(&storage, "t1", &[7]).await;

    let updater = Updater::new(things_domain(), storage.clone());
    updater.update("t1").await.unwrap();

    storage
        .insert_one(
            "parts",
            doc(json!({"_id": "late", "thing_id": "t1", "weight": 5})),
        )
        .await
        .unwrap();
    updater.update("t1").await.unwrap();

    let thing = storage
        .find_one("things", &rederive::id_filter("t1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(thing["_D"], json!({"total_weight": 12}));
}

#[tokio::test]
async fn derived_props_persist_at_every_level() {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .insert_one("things", doc(json!({"_id": "t1"})))
        .await
        .unwrap();
    storage
        .insert_one("parts", doc(json!({"_id": "p1", "thing_id": "t1"})))
        .await
        .unwrap();
    storage
        .insert_one("parts", doc(json!({"_id": "p2", "thing_id": "t1"})))
        .await
        .unwrap();
    for (i, part) in [(0, "p1"), (1, "p1"), (2, "p2")] {
        storage
            .insert_one("bolts", doc(json!({"_id": format!("b{}", i), "part_id": part})))
            .await
            .unwrap();
    }

    let updater = Updater::new(deep_domain(), storage.clone());
    updater.update("t1").await.unwrap();

    let thing = storage
        .find_one("things", &rederive::id_filter("t1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(thing["_D"], json!({"total_bolts": 3}));

    let p1 = storage
        .find_one("parts", &rederive::id_filter("p1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(p1["_D"], json!({"bolt_count": 2}));
    let p2 = storage
        .find_one("parts", &rederive::id_filter("p2"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(p2["_D"], json!({"bolt_count": 1}));
}

// =============================================================================
// Idempotence & diff suppression
// =============================================================================

#[tokio::test]
async fn second_update_issues_no_write_backs() {
    let storage = Arc::new(MemoryStorage::new());
    seed_thing(&storage, "t1", &[7, 13]).await;

    let updater = Updater::new(things_domain(), storage.clone());
    updater.update("t1").await.unwrap();
    let writes_after_first = storage.update_count();
    assert_eq!(writes_after_first, 1);

    updater.update("t1").await.unwrap();
    assert_eq!(storage.update_count(), writes_after_first);
}

#[tokio::test]
async fn matching_stored_snapshot_suppresses_write() {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .insert_one(
            "things",
            doc(json!({"_id": "t1", "_D": {"total_weight": 20}})),
        )
        .await
        .unwrap();
    for (id, weight) in [("p1", 7), ("p2", 13)] {
        storage
            .insert_one(
                "parts",
                doc(json!({"_id": id, "thing_id": "t1", "weight": weight})),
            )
            .await
            .unwrap();
    }

    let updater = Updater::new(things_domain(), storage.clone());
    updater.update("t1").await.unwrap();
    assert_eq!(storage.update_count(), 0);
}

#[tokio::test]
async fn stale_stored_snapshot_is_rewritten() {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .insert_one(
            "things",
            doc(json!({"_id": "t1", "_D": {"total_weight": 999}})),
        )
        .await
        .unwrap();
    storage
        .insert_one(
            "parts",
            doc(json!({"_id": "p1", "thing_id": "t1", "weight": 7})),
        )
        .await
        .unwrap();

    let updater = Updater::new(things_domain(), storage.clone());
    updater.update("t1").await.unwrap();

    let thing = storage
        .find_one("things", &rederive::id_filter("t1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(thing["_D"], json!({"total_weight": 7}));
}

// =============================================================================
// Cycle safety
// =============================================================================

#[tokio::test]
async fn cyclic_schema_materializes_each_instance_once() {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .insert_one("things", doc(json!({"_id": "t1"})))
        .await
        .unwrap();
    for id in ["p1", "p2"] {
        storage
            .insert_one("parts", doc(json!({"_id": id, "thing_id": "t1"})))
            .await
            .unwrap();
    }

    let updater = Updater::new(cyclic_domain(), storage.clone());
    updater.update("t1").await.unwrap();

    // One find_one for the root, one find for the parts list, and one
    // hasOne lookup per part. A revisit of the already-claimed root stops
    // without refetching its relations.
    assert_eq!(storage.find_count(), 4);
}

// =============================================================================
// Failure modes
// =============================================================================

#[tokio::test]
async fn updating_a_missing_root_fails_with_key() {
    let storage = Arc::new(MemoryStorage::new());
    let updater = Updater::new(things_domain(), storage);
    let err = updater.update("absent").await.unwrap_err();
    match err {
        DeriveError::Missing { type_name, key } => {
            assert_eq!(type_name, "things");
            assert_eq!(key, "absent");
        }
        other => panic!("expected Missing, got {other}"),
    }
}

#[tokio::test]
async fn failed_write_back_is_reported_and_siblings_still_land() {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .insert_one("things", doc(json!({"_id": "t1"})))
        .await
        .unwrap();
    storage
        .insert_one("parts", doc(json!({"_id": "p1", "thing_id": "t1"})))
        .await
        .unwrap();
    storage
        .insert_one("bolts", doc(json!({"_id": "b1", "part_id": "p1"})))
        .await
        .unwrap();

    let flaky = Arc::new(FailingStorage::new(storage.clone()).failing_updates_in("things"));
    let updater = Updater::new(deep_domain(), flaky);
    let err = updater.update("t1").await.unwrap_err();
    match err {
        DeriveError::Persist { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].collection, "things");
            assert_eq!(failures[0].id, "t1");
        }
        other => panic!("expected Persist, got {other}"),
    }

    // The part's write-back went through despite the root's failure.
    let p1 = storage
        .find_one("parts", &rederive::id_filter("p1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(p1["_D"], json!({"bolt_count": 1}));
    let t1 = storage
        .find_one("things", &rederive::id_filter("t1"))
        .await
        .unwrap()
        .unwrap();
    assert!(t1.get("_D").is_none());
}

// =============================================================================
// Resync
// =============================================================================

#[tokio::test]
async fn resync_reports_failed_root_and_completes_the_rest() {
    let storage = Arc::new(MemoryStorage::new());
    seed_thing(&storage, "t1", &[1, 2]).await;
    seed_thing(&storage, "t2", &[5]).await;
    seed_thing(&storage, "t3", &[10]).await;

    let flaky = Arc::new(FailingStorage::new(storage.clone()).failing_reads_of("t2"));
    let updater = Updater::new(things_domain(), flaky);
    let err = updater.resync().await.unwrap_err();
    match err {
        ResyncError::Roots(failures) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].0, "t2");
            assert!(matches!(failures[0].1, DeriveError::Load { .. }));
        }
        other => panic!("expected Roots, got {other}"),
    }

    for (id, expected) in [("t1", 3), ("t3", 10)] {
        let thing = storage
            .find_one("things", &rederive::id_filter(id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(thing["_D"], json!({"total_weight": expected}));
    }
}

#[tokio::test]
async fn resync_recomputes_every_root() {
    let storage = Arc::new(MemoryStorage::new());
    seed_thing(&storage, "t1", &[1, 2]).await;
    seed_thing(&storage, "t2", &[10]).await;

    let updater = Updater::new(things_domain(), storage.clone());
    updater.resync().await.unwrap();

    for (id, expected) in [("t1", 3), ("t2", 10)] {
        let thing = storage
            .find_one("things", &rederive::id_filter(id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(thing["_D"], json!({"total_weight": expected}));
    }
}
