use std::fs;
use std::time::Duration;

use fetchcache::config::Config;
use fetchcache::{Codec, FetchRequest, SetOptions, ValueProcessors};
use fetchcache_test as test;
use serde_json::{Value, json};

use crate::{Calls, MEMBERS, TEAM, Team, filesystem_config, setup_cache};

#[tokio::test]
async fn test_values_survive_restart() {
    let dir = test::tempdir();
    let config = filesystem_config(&dir);
    let calls = Calls::default();

    let cache = setup_cache(&config, &calls).await;
    let team = cache.fetch(TEAM, "core".into()).await.unwrap();
    assert_eq!(team.members, ["core-lead", "core-dev"]);
    cache.teardown().await.unwrap();

    let stored: Value =
        serde_json::from_slice(&fs::read(dir.path().join("store.json")).unwrap()).unwrap();
    let cached_team: Value =
        serde_json::from_str(stored["it:team:core"].as_str().unwrap()).unwrap();
    assert_eq!(
        cached_team,
        json!({"slug": "core", "members": ["core-lead", "core-dev"]})
    );

    // value processors are not persisted
    let cache = setup_cache(&config, &calls)
        .await
        .with_value_processors(ValueProcessors::new().with("team", Codec::Json));
    let again: Team = cache.fetch(TEAM, "core".into()).await.unwrap();
    assert_eq!(again, team);
    assert_eq!(calls.get(), 1);
}

#[tokio::test]
async fn test_value_processors_from_config() {
    let dir = test::tempdir();
    let yaml = format!(
        r#"
        store:
          type: filesystem
          path: {}
        cache:
          prefix: "it:"
          set_options:
            expiry: 1h
        fetchers:
          team: json
          members: number
        "#,
        dir.path().join("store.json").display()
    );
    let config_path = dir.path().join("config.yml");
    fs::write(&config_path, yaml).unwrap();
    let config = Config::get(Some(config_path.as_path())).unwrap();
    assert_eq!(
        config.cache.set_options,
        SetOptions::expire_after(Duration::from_secs(3600))
    );

    let calls = Calls::default();
    let cache = setup_cache(&config, &calls)
        .await
        .with_value_processors(ValueProcessors::from_kinds(&config.fetchers));

    let requests = ["web", "core", "web"]
        .into_iter()
        .map(|slug| FetchRequest::new(MEMBERS, slug.to_owned()))
        .collect();
    let members = cache.fetch_multiple(requests).await.unwrap();
    assert_eq!(members, [3, 4, 3]);
    assert_eq!(calls.get(), 2);

    let results = cache.revalidate().await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|result| result.is_valid));
    assert_eq!(results[0].key, "it:members:core");
    assert_eq!(results[0].parsed_value, json!(4));
}

#[tokio::test]
async fn test_cleanup_flushes_store_file() {
    let dir = test::tempdir();
    let config = filesystem_config(&dir);
    let calls = Calls::default();

    let cache = setup_cache(&config, &calls).await;
    cache.fetch(MEMBERS, "ops".into()).await.unwrap();
    cache.cleanup().await.unwrap();

    let stored: Value =
        serde_json::from_slice(&fs::read(dir.path().join("store.json")).unwrap()).unwrap();
    assert_eq!(stored, json!({}));

    assert_eq!(cache.fetch(MEMBERS, "ops".into()).await.unwrap(), 3);
    assert_eq!(calls.get(), 2);
}
