use denorm::test_utils::{people_fixture, snapshot, store_with};
use denorm::{ErrorKind, MergeOutcome, Merger};
use denorm_config::shared::{MergeConfig, UnresolvedKeyPolicy};
use denorm_telemetry::tracing::init_test_tracing;
use serde_json::json;

#[tokio::test(flavor = "multi_thread")]
async fn foreign_keys_are_replaced_by_child_documents() {
    init_test_tracing();
    let store = store_with(&people_fixture()).await;
    let merger = Merger::new(store.clone(), MergeConfig::default()).unwrap();

    let outcome = merger.merge("people", &["gender"]).await.unwrap();

    let MergeOutcome::Completed(summary) = outcome else {
        panic!("expected a completed merge");
    };
    assert_eq!(summary.documents_processed(), 2);
    assert_eq!(summary.join.write.applied, 2);
    assert_eq!(summary.join.unresolved(), 0);

    assert_eq!(
        snapshot(&store, &["people"]).await,
        json!({"people": [
            {"_id": 11, "name": "Ann", "gender": {"_id": 1, "name": "Male"}},
            {"_id": 22, "name": "Bob", "gender": {"_id": 2, "name": "Female"}},
            {"_id": 33, "name": "Cid"}
        ]})
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn explicit_collection_and_key_are_honored() {
    init_test_tracing();
    let store = store_with(&json!({
        "orders": [
            {"_id": "o1", "customer": "c-1"},
            {"_id": "o2", "customer": "c-2"}
        ],
        "customers": [
            {"_id": 1, "code": "c-1", "name": "Acme"},
            {"_id": 2, "code": "c-2", "name": "Globex"}
        ]
    }))
    .await;
    let merger = Merger::new(store.clone(), MergeConfig::default()).unwrap();

    merger
        .merge("orders", &["customer:customers.code"])
        .await
        .unwrap();

    assert_eq!(
        snapshot(&store, &["orders"]).await,
        json!({"orders": [
            {"_id": "o1", "customer": {"_id": 1, "code": "c-1", "name": "Acme"}},
            {"_id": "o2", "customer": {"_id": 2, "code": "c-2", "name": "Globex"}}
        ]})
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unresolved_keys_are_skipped_by_default() {
    init_test_tracing();
    let store = store_with(&json!({
        "people": [{"_id": 11, "gender": 1}, {"_id": 22, "gender": 7}],
        "gender": [{"_id": 1, "name": "Male"}]
    }))
    .await;
    let merger = Merger::new(store.clone(), MergeConfig::default()).unwrap();

    let outcome = merger.merge("people", &["gender"]).await.unwrap();

    let MergeOutcome::Completed(summary) = outcome else {
        panic!("expected a completed merge");
    };
    assert_eq!(summary.join.unresolved(), 1);
    assert_eq!(
        snapshot(&store, &["people"]).await,
        json!({"people": [
            {"_id": 11, "gender": {"_id": 1, "name": "Male"}},
            {"_id": 22, "gender": 7}
        ]})
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unresolved_keys_abort_when_configured() {
    init_test_tracing();
    let store = store_with(&json!({
        "people": [{"_id": 11, "gender": 1}, {"_id": 22, "gender": 7}],
        "gender": [{"_id": 1, "name": "Male"}]
    }))
    .await;
    let config = MergeConfig {
        unresolved: UnresolvedKeyPolicy::Abort,
        ..MergeConfig::default()
    };
    let merger = Merger::new(store.clone(), config).unwrap();

    let err = merger.merge("people", &["gender"]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnresolvedForeignKey);
    assert!(store.documents("merged").await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn filter_and_projection_limit_the_merged_parents() {
    init_test_tracing();
    let store = store_with(&json!({
        "people": [
            {"_id": 11, "gender": 1, "active": true},
            {"_id": 22, "gender": 2, "active": false}
        ],
        "gender": [{"_id": 1, "name": "Male"}, {"_id": 2, "name": "Female"}]
    }))
    .await;
    let config = MergeConfig {
        filter: Some(json!({"active": true})),
        projection: Some(vec!["active".to_string()]),
        ..MergeConfig::default()
    };
    let merger = Merger::new(store.clone(), config).unwrap();

    merger.merge("people", &["gender"]).await.unwrap();

    assert_eq!(
        snapshot(&store, &["people"]).await,
        json!({"people": [
            {"_id": 11, "gender": {"_id": 1, "name": "Male"}, "active": true},
            {"_id": 22, "gender": 2, "active": false}
        ]})
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn embedded_values_must_carry_the_child_key() {
    init_test_tracing();
    let store = store_with(&json!({
        "people": [{"_id": 11, "gender": {"name": "Male"}}],
        "gender": [{"_id": 1, "name": "Male"}]
    }))
    .await;
    let merger = Merger::new(store, MergeConfig::default()).unwrap();

    let err = merger.merge("people", &["gender"]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidForeignKey);
}
