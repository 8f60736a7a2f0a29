use denorm::Merger;
use denorm::test_utils::{owner_fixture, people_fixture, snapshot, store_with};
use denorm_config::shared::{BatchConfig, IndexConfig, JoinStrategy, MergeConfig};
use denorm_telemetry::tracing::init_test_tracing;
use serde_json::{Value, json};

fn configs() -> Vec<(&'static str, MergeConfig)> {
    let small_batches = BatchConfig {
        page_size: 2,
        size: 1,
    };

    vec![
        ("full", MergeConfig::default()),
        (
            "windowed",
            MergeConfig {
                index: IndexConfig { threshold: 0 },
                ..MergeConfig::default()
            },
        ),
        (
            "windowed small batches",
            MergeConfig {
                index: IndexConfig { threshold: 0 },
                batch: small_batches.clone(),
                ..MergeConfig::default()
            },
        ),
        (
            "aggregation",
            MergeConfig {
                strategy: JoinStrategy::Aggregation,
                ..MergeConfig::default()
            },
        ),
        (
            "aggregation small batches",
            MergeConfig {
                strategy: JoinStrategy::Aggregation,
                index: IndexConfig { threshold: 0 },
                batch: small_batches,
                ..MergeConfig::default()
            },
        ),
    ]
}

async fn merged(fixture: &Value, parent: &str, specs: &[&str], config: MergeConfig) -> Value {
    let store = store_with(fixture).await;
    let merger = Merger::new(store.clone(), config).unwrap();
    merger.merge(parent, specs).await.unwrap();

    snapshot(&store, &[parent]).await
}

async fn assert_all_strategies_agree(fixture: Value, parent: &str, specs: &[&str]) {
    let mut configs = configs().into_iter();
    let (_, reference_config) = configs.next().unwrap();
    let reference = merged(&fixture, parent, specs, reference_config).await;

    for (name, config) in configs {
        let result = merged(&fixture, parent, specs, config).await;
        assert_eq!(result, reference, "strategy `{name}` diverged");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn one_to_one_is_strategy_independent() {
    init_test_tracing();
    assert_all_strategies_agree(people_fixture(), "people", &["gender"]).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn one_to_many_is_strategy_independent() {
    init_test_tracing();
    assert_all_strategies_agree(owner_fixture(), "owner", &["pet:[pet.owner]"]).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn mixed_descriptors_are_strategy_independent() {
    init_test_tracing();
    let fixture = json!({
        "owner": [
            {"_id": 11, "city": "ber"},
            {"_id": 22, "city": "lis"},
            {"_id": 33, "city": "nyc"},
            {"_id": 44}
        ],
        "city": [
            {"_id": "ber", "name": "Berlin"},
            {"_id": "lis", "name": "Lisbon"}
        ],
        "pet": [
            {"_id": 1, "owner": 22, "name": "Snoopy"},
            {"_id": 2, "owner": 11, "name": "Garfield"},
            {"_id": 3, "owner": 22, "name": "Flipper"},
            {"_id": 4, "owner": 44, "name": "Odie"}
        ]
    });

    assert_all_strategies_agree(fixture, "owner", &["city", "pets:[pet.owner]"]).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn merging_twice_equals_merging_once() {
    init_test_tracing();

    for (name, config) in configs() {
        let store = store_with(&owner_fixture()).await;
        let merger = Merger::new(store.clone(), config).unwrap();

        merger.merge("owner", &["pet:[pet.owner]"]).await.unwrap();
        let once = snapshot(&store, &["owner"]).await;

        // Dropping the stamp forces the join to run again over already merged parents.
        merger.unstamp("owner", &["pet:[pet.owner]"]).await.unwrap();
        merger.merge("owner", &["pet:[pet.owner]"]).await.unwrap();
        let twice = snapshot(&store, &["owner"]).await;

        assert_eq!(twice, once, "strategy `{name}` is not idempotent");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn embedded_values_merge_again_to_the_same_result() {
    init_test_tracing();

    for (name, config) in configs() {
        let store = store_with(&people_fixture()).await;
        let merger = Merger::new(store.clone(), config).unwrap();

        merger.merge("people", &["gender"]).await.unwrap();
        let once = snapshot(&store, &["people"]).await;

        merger.unstamp("people", &["gender"]).await.unwrap();
        merger.merge("people", &["gender"]).await.unwrap();
        let twice = snapshot(&store, &["people"]).await;

        assert_eq!(twice, once, "strategy `{name}` is not idempotent");
    }
}
