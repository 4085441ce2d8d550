use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fetchcache::config::{CacheConfig, Config};
use fetchcache::store::FilesystemStoreConfig;
use fetchcache::{FetchCache, FetcherKey, FetcherRegistry, KeyProcessors, StoreConfig};
use fetchcache_test as test;
use serde::{Deserialize, Serialize};

pub use test::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub slug: String,
    pub members: Vec<String>,
}

pub const TEAM: FetcherKey<String, Team> = FetcherKey::new("team");
pub const MEMBERS: FetcherKey<String, u64> = FetcherKey::new("members");

/// Counts fetcher invocations across cache instances.
#[derive(Debug, Clone, Default)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn fetchers(calls: &Calls) -> FetcherRegistry {
    let team_calls = calls.clone();
    let member_calls = calls.clone();

    FetcherRegistry::new()
        .register(TEAM, move |slug: String| {
            let calls = team_calls.clone();
            async move {
                calls.record();
                Ok(Team {
                    members: vec![format!("{slug}-lead"), format!("{slug}-dev")],
                    slug,
                })
            }
        })
        .register(MEMBERS, move |slug: String| {
            let calls = member_calls.clone();
            async move {
                calls.record();
                Ok(slug.len() as u64)
            }
        })
}

pub fn key_processors() -> KeyProcessors {
    KeyProcessors::new()
        .register(TEAM, |slug: &String| slug.clone())
        .register(MEMBERS, |slug: &String| slug.clone())
}

/// Creates a configuration with a filesystem store inside `dir`.
pub fn filesystem_config(dir: &TempDir) -> Config {
    Config {
        store: StoreConfig::Filesystem(FilesystemStoreConfig {
            path: dir.path().join("store.json"),
        }),
        cache: CacheConfig {
            prefix: "it:".into(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Creates and connects a cache for `config`, the way an application would.
pub async fn setup_cache(config: &Config, calls: &Calls) -> FetchCache {
    test::setup();

    let store = config.store.build().unwrap();
    let cache = FetchCache::from_config(store, fetchers(calls), &config.cache)
        .with_key_processors(key_processors());
    cache.connect().await.unwrap();
    cache
}
