use denorm::test_utils::{FailingWriteStore, owner_fixture, people_fixture, snapshot, store_with};
use denorm::{ErrorKind, MergeOutcome, Merger};
use denorm_config::shared::{BatchConfig, JoinStrategy, MergeConfig};
use denorm_telemetry::tracing::init_test_tracing;

fn one_parent_per_batch() -> MergeConfig {
    MergeConfig {
        batch: BatchConfig {
            page_size: 10,
            size: 1,
        },
        ..MergeConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_write_leaves_no_stamp() {
    init_test_tracing();
    let memory = store_with(&people_fixture()).await;
    let store = FailingWriteStore::wrap(memory.clone(), "people", 1);
    let merger = Merger::new(store.clone(), one_parent_per_batch()).unwrap();

    let err = merger.merge("people", &["gender"]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WriteBatchFailed);
    assert_eq!(store.writes(), 2);
    assert!(memory.documents("merged").await.is_empty());

    // The first batch was written before the failure.
    let people = memory.documents("people").await;
    assert!(people[0]["gender"].is_object());
    assert!(people[1]["gender"].is_number());
}

#[tokio::test(flavor = "multi_thread")]
async fn rerunning_after_a_failure_completes_the_merge() {
    init_test_tracing();
    let memory = store_with(&people_fixture()).await;
    let failing = FailingWriteStore::wrap(memory.clone(), "people", 1);

    let err = Merger::new(failing, one_parent_per_batch())
        .unwrap()
        .merge("people", &["gender"])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WriteBatchFailed);

    let outcome = Merger::new(memory.clone(), one_parent_per_batch())
        .unwrap()
        .merge("people", &["gender"])
        .await
        .unwrap();
    assert!(matches!(outcome, MergeOutcome::Completed(_)));

    let reference = store_with(&people_fixture()).await;
    Merger::new(reference.clone(), MergeConfig::default())
        .unwrap()
        .merge("people", &["gender"])
        .await
        .unwrap();

    assert_eq!(
        snapshot(&memory, &["people", "merged"]).await,
        snapshot(&reference, &["people", "merged"]).await
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_staging_leaves_no_stamp() {
    init_test_tracing();
    let memory = store_with(&owner_fixture()).await;
    let store = FailingWriteStore::wrap(memory.clone(), "owner_merge_temp", 0);
    let config = MergeConfig {
        strategy: JoinStrategy::Aggregation,
        ..MergeConfig::default()
    };
    let merger = Merger::new(store, config).unwrap();

    let err = merger.merge("owner", &["pet:[pet.owner]"]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WriteBatchFailed);
    assert!(memory.documents("merged").await.is_empty());
    assert_eq!(
        snapshot(&memory, &["owner"]).await,
        snapshot(&store_with(&owner_fixture()).await, &["owner"]).await
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_stamp_write_is_reported() {
    init_test_tracing();
    let memory = store_with(&people_fixture()).await;
    let store = FailingWriteStore::wrap(memory.clone(), "merged", 0);
    let merger = Merger::new(store, MergeConfig::default()).unwrap();

    let err = merger.merge("people", &["gender"]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WriteBatchFailed);
    assert!(memory.documents("merged").await.is_empty());
}
