use denorm::test_utils::{owner_fixture, people_fixture, snapshot, store_with};
use denorm::{MergeOutcome, Merger};
use denorm_config::shared::MergeConfig;
use denorm_telemetry::tracing::init_test_tracing;
use serde_json::json;

#[tokio::test(flavor = "multi_thread")]
async fn completed_runs_are_stamped() {
    init_test_tracing();
    let store = store_with(&owner_fixture()).await;
    let merger = Merger::new(store.clone(), MergeConfig::default()).unwrap();

    merger.merge("owner", &["pet:[pet.owner]"]).await.unwrap();

    assert_eq!(
        snapshot(&store, &["merged"]).await,
        json!({"merged": [{
            "_id": "owner:many:pet:pet.owner",
            "merged": ["owner", "many", "pet", "pet", "owner"]
        }]})
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn stamped_runs_are_skipped() {
    init_test_tracing();
    let store = store_with(&people_fixture()).await;
    let merger = Merger::new(store.clone(), MergeConfig::default()).unwrap();

    merger.merge("people", &["gender"]).await.unwrap();
    let after_first = snapshot(&store, &["people", "merged"]).await;

    let outcome = merger.merge("people", &["gender"]).await.unwrap();

    assert_eq!(outcome, MergeOutcome::AlreadyMerged);
    assert_eq!(snapshot(&store, &["people", "merged"]).await, after_first);
}

#[tokio::test(flavor = "multi_thread")]
async fn only_pending_descriptors_are_joined() {
    init_test_tracing();
    let store = store_with(&json!({
        "people": [{"_id": 11, "gender": 1, "city": "ber"}],
        "gender": [{"_id": 1, "name": "Male"}],
        "city": [{"_id": "ber", "name": "Berlin"}]
    }))
    .await;
    let merger = Merger::new(store.clone(), MergeConfig::default()).unwrap();

    merger.merge("people", &["gender"]).await.unwrap();
    let outcome = merger.merge("people", &["gender", "city"]).await.unwrap();

    let MergeOutcome::Completed(summary) = outcome else {
        panic!("expected a completed merge");
    };
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.join.descriptors.len(), 1);
    assert_eq!(summary.join.descriptors[0].descriptor.parent_field, "city");
    assert_eq!(store.documents("merged").await.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn stamps_are_per_parent_collection() {
    init_test_tracing();
    let store = store_with(&json!({
        "people": [{"_id": 11, "gender": 1}],
        "staff": [{"_id": 7, "gender": 1}],
        "gender": [{"_id": 1, "name": "Male"}]
    }))
    .await;
    let merger = Merger::new(store.clone(), MergeConfig::default()).unwrap();

    merger.merge("people", &["gender"]).await.unwrap();
    let outcome = merger.merge("staff", &["gender"]).await.unwrap();

    assert!(matches!(outcome, MergeOutcome::Completed(_)));
    assert_eq!(
        snapshot(&store, &["staff"]).await,
        json!({"staff": [{"_id": 7, "gender": {"_id": 1, "name": "Male"}}]})
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn stamp_collection_is_configurable() {
    init_test_tracing();
    let store = store_with(&people_fixture()).await;
    let config = MergeConfig {
        stamp_collection: "denorm_runs".to_string(),
        ..MergeConfig::default()
    };
    let merger = Merger::new(store.clone(), config).unwrap();

    merger.merge("people", &["gender"]).await.unwrap();

    assert!(store.documents("merged").await.is_empty());
    assert_eq!(store.documents("denorm_runs").await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn unstamp_removes_only_the_given_descriptors() {
    init_test_tracing();
    let store = store_with(&json!({
        "people": [{"_id": 11, "gender": 1, "city": "ber"}],
        "gender": [{"_id": 1, "name": "Male"}],
        "city": [{"_id": "ber", "name": "Berlin"}]
    }))
    .await;
    let merger = Merger::new(store.clone(), MergeConfig::default()).unwrap();

    merger.merge("people", &["gender", "city"]).await.unwrap();

    assert_eq!(merger.unstamp("people", &["city"]).await.unwrap(), 1);
    assert_eq!(merger.unstamp("people", &["city"]).await.unwrap(), 0);

    let stamps = store.documents("merged").await;
    assert_eq!(stamps.len(), 1);
    assert_eq!(stamps[0]["_id"], json!("people:one:gender:gender._id"));
}
