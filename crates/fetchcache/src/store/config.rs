use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{FilesystemStore, MemoryStore, RedisStore, Store, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    /// Connection URL of the redis server, like `redis://127.0.0.1:6379/0`.
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemStoreConfig {
    /// Path of the JSON file holding the store contents.
    pub path: PathBuf,
}

/// The backend to use as the cache store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    Redis(RedisStoreConfig),
    Filesystem(FilesystemStoreConfig),
    /// A process-local store, which forgets everything on exit.
    #[default]
    Memory,
}

impl StoreConfig {
    /// Creates the configured store. The store still needs to be connected.
    pub fn build(&self) -> StoreResult<Arc<dyn Store>> {
        let store: Arc<dyn Store> = match self {
            Self::Redis(config) => Arc::new(RedisStore::open(&config.url)?),
            Self::Filesystem(config) => Arc::new(FilesystemStore::new(&config.path)),
            Self::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(store)
    }
}
