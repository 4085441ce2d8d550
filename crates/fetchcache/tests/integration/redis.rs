use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fetchcache::store::{RedisStore, ScanPage};
use fetchcache::{FetchCache, SetCondition, SetOptions, Store};
use fetchcache_test as test;

use crate::{Calls, MEMBERS, fetchers, key_processors};

/// Connects to the redis server, or returns `None` if redis tests are disabled.
async fn redis_store() -> Option<RedisStore> {
    test::setup();
    let url = test::redis_url()?;
    let store = RedisStore::open(&url).unwrap();
    store.connect().await.unwrap();
    Some(store)
}

/// A key prefix unique to this test run, so tests never touch foreign keys.
fn unique_prefix(test: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("fetchcache-test:{test}:{}:{nanos}:", std::process::id())
}

async fn scan_all(store: &RedisStore, pattern: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut cursor = 0;
    loop {
        let ScanPage {
            cursor: next,
            keys: page,
        } = store.scan(cursor, pattern, 10).await.unwrap();
        keys.extend(page);
        cursor = next;
        if cursor == 0 {
            break;
        }
    }
    keys.sort();
    keys.dedup();
    keys
}

#[tokio::test]
async fn test_redis_store() {
    let Some(store) = redis_store().await else {
        return;
    };
    let prefix = unique_prefix("store");
    let key = |name: &str| format!("{prefix}{name}");

    store
        .set(&key("a"), "1", &SetOptions::default())
        .await
        .unwrap();
    let only_new = SetOptions {
        condition: Some(SetCondition::NotExists),
        ..Default::default()
    };
    store.set(&key("a"), "2", &only_new).await.unwrap();
    assert_eq!(store.get(&key("a")).await.unwrap().as_deref(), Some("1"));

    store
        .mset(&[(key("b"), "x".into()), (key("c"), "y".into())])
        .await
        .unwrap();
    let values = store
        .mget(&[key("c"), key("missing"), key("b")])
        .await
        .unwrap();
    assert_eq!(values, [Some("y".to_owned()), None, Some("x".to_owned())]);

    let keys = scan_all(&store, &format!("{prefix}*")).await;
    assert_eq!(keys, [key("a"), key("b"), key("c")]);

    store
        .set(
            &key("short"),
            "gone",
            &SetOptions::expire_after(Duration::from_millis(50)),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.get(&key("short")).await.unwrap(), None);

    // clean up without flushing the whole database
    let options = SetOptions::expire_after(Duration::from_millis(1));
    for name in ["a", "b", "c"] {
        store.set(&key(name), "", &options).await.unwrap();
    }
    store.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_fetch_through_redis() {
    let Some(store) = redis_store().await else {
        return;
    };
    let prefix = unique_prefix("fetch");
    let calls = Calls::default();

    let cache = FetchCache::new(std::sync::Arc::new(store), fetchers(&calls))
        .with_prefix(prefix.clone())
        .with_key_processors(key_processors())
        .with_set_options(SetOptions::expire_after(Duration::from_secs(60)));

    let (a, b) = futures::join!(
        cache.fetch(MEMBERS, "redis".into()),
        cache.fetch(MEMBERS, "redis".into())
    );
    assert_eq!(a.unwrap(), 5);
    assert_eq!(b.unwrap(), 5);
    assert_eq!(cache.fetch(MEMBERS, "redis".into()).await.unwrap(), 5);
    assert_eq!(calls.get(), 1);

    let results = cache.revalidate().await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].key, format!("{prefix}members:redis"));
    assert!(results[0].is_valid);

    cache.teardown().await.unwrap();
}
