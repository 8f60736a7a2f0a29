use denorm::test_utils::{owner_fixture, snapshot, store_with};
use denorm::{MergeOutcome, Merger};
use denorm_config::shared::MergeConfig;
use denorm_telemetry::tracing::init_test_tracing;
use serde_json::json;

#[tokio::test(flavor = "multi_thread")]
async fn children_are_attached_in_id_order() {
    init_test_tracing();
    let store = store_with(&owner_fixture()).await;
    let merger = Merger::new(store.clone(), MergeConfig::default()).unwrap();

    let outcome = merger.merge("owner", &["pet:[pet.owner]"]).await.unwrap();

    let MergeOutcome::Completed(summary) = outcome else {
        panic!("expected a completed merge");
    };
    assert_eq!(summary.documents_processed(), 3);
    assert_eq!(summary.join.write.applied, 2);

    assert_eq!(
        snapshot(&store, &["owner"]).await,
        json!({"owner": [
            {"_id": 11, "name": "Charlie", "pet": [
                {"_id": 1, "owner": 11, "name": "Snoopy"},
                {"_id": 3, "owner": 11, "name": "Garfield"}
            ]},
            {"_id": 22, "name": "Penny", "pet": [
                {"_id": 2, "owner": 22, "name": "Snoopy"},
                {"_id": 4, "owner": 22, "name": "Flipper"}
            ]},
            {"_id": 44, "name": "Jon"}
        ]})
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn group_sort_field_orders_the_children() {
    init_test_tracing();
    let store = store_with(&owner_fixture()).await;
    let config = MergeConfig {
        group_sort_field: "name".to_string(),
        ..MergeConfig::default()
    };
    let merger = Merger::new(store.clone(), config).unwrap();

    // The child key defaults to the parent collection name.
    merger.merge("owner", &["pet:[pet]"]).await.unwrap();

    let owners = store.documents("owner").await;
    let names = |position: usize| -> Vec<String> {
        owners[position]["pet"]
            .as_array()
            .unwrap()
            .iter()
            .map(|pet| pet["name"].as_str().unwrap().to_string())
            .collect()
    };
    assert_eq!(names(0), vec!["Garfield", "Snoopy"]);
    assert_eq!(names(1), vec!["Flipper", "Snoopy"]);
    assert!(owners[2].get("pet").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn one_and_many_descriptors_merge_in_one_run() {
    init_test_tracing();
    let store = store_with(&json!({
        "owner": [
            {"_id": 11, "city": "ber"},
            {"_id": 22, "city": "lis"}
        ],
        "city": [
            {"_id": "ber", "name": "Berlin"},
            {"_id": "lis", "name": "Lisbon"}
        ],
        "pet": [
            {"_id": 1, "owner": 22, "name": "Snoopy"}
        ]
    }))
    .await;
    let merger = Merger::new(store.clone(), MergeConfig::default()).unwrap();

    merger
        .merge("owner", &["city", "pets:[pet.owner]"])
        .await
        .unwrap();

    assert_eq!(
        snapshot(&store, &["owner"]).await,
        json!({"owner": [
            {"_id": 11, "city": {"_id": "ber", "name": "Berlin"}},
            {"_id": 22, "city": {"_id": "lis", "name": "Lisbon"}, "pets": [
                {"_id": 1, "owner": 22, "name": "Snoopy"}
            ]}
        ]})
    );
}
