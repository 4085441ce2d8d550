//! The remote key-value store backing the fetch cache.
//!
//! The cache only ever talks to its store through the small [`Store`] contract: single and
//! batched reads, writes with opaque [`SetOptions`], cursor based key scans, and the connection
//! lifecycle. Three backends are provided:
//!
//! - [`RedisStore`], the production backend.
//! - [`MemoryStore`], an in-process map which is mostly useful for tests.
//! - [`FilesystemStore`], a [`MemoryStore`] persisted to a JSON file, used as a stand-in for a
//!   real store during local development.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod config;
mod filesystem;
mod memory;
mod redis;

pub use self::config::{FilesystemStoreConfig, RedisStoreConfig, StoreConfig};
pub use self::filesystem::FilesystemStore;
pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// The default number of keys a single [`Store::scan`] call should look at.
pub const DEFAULT_SCAN_COUNT: usize = 100;

/// Errors talking to a [`Store`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// An operation was attempted before [`Store::connect`].
    #[error("the {0} store is not connected")]
    NotConnected(&'static str),
    #[error("redis command failed")]
    Redis(#[from] ::redis::RedisError),
    #[error("failed to access the store file")]
    Io(#[from] std::io::Error),
    #[error("the store file does not contain a valid JSON object")]
    Json(#[from] serde_json::Error),
    #[error("invalid key pattern")]
    Pattern(#[from] glob::PatternError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Condition under which [`Store::set`] writes a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetCondition {
    /// Only write the value if the key does not exist yet (`NX`).
    NotExists,
    /// Only write the value if the key already exists (`XX`).
    Exists,
}

/// Backend options for writing a single value.
///
/// The cache passes these through to the store untouched. Backends honor what they support.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SetOptions {
    /// Expire the written key after this duration.
    #[serde(with = "humantime_serde")]
    pub expiry: Option<Duration>,
    /// Only write under the given condition.
    pub condition: Option<SetCondition>,
    /// Retain the time to live of an existing key when overwriting it.
    ///
    /// Has no effect in combination with `expiry`.
    pub keep_ttl: bool,
}

impl SetOptions {
    /// Options which expire the written key after `expiry`.
    pub fn expire_after(expiry: Duration) -> Self {
        Self {
            expiry: Some(expiry),
            ..Default::default()
        }
    }
}

/// One page of a [`Store::scan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// The cursor to continue scanning from. `0` means the scan is complete.
    pub cursor: u64,
    /// The keys matched on this page.
    pub keys: Vec<String>,
}

/// A remote, string valued key-value store.
#[async_trait]
pub trait Store: Send + Sync + fmt::Debug {
    /// A short name of the backend, used for logging and metrics.
    fn name(&self) -> &'static str;

    async fn connect(&self) -> StoreResult<()>;

    async fn disconnect(&self) -> StoreResult<()>;

    /// Reads a single value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes a single value.
    async fn set(&self, key: &str, value: &str, options: &SetOptions) -> StoreResult<()>;

    /// Reads multiple values at once.
    ///
    /// The returned values are aligned with `keys`.
    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>>;

    /// Writes multiple values at once.
    async fn mset(&self, pairs: &[(String, String)]) -> StoreResult<()>;

    /// Scans the keys matching the glob-style `pattern`, starting at `cursor`.
    ///
    /// Start a scan with cursor `0`, and continue with the returned cursor until it is `0` again.
    /// `count` is a hint of how many keys to look at in one call.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage>;

    /// Removes all keys from the store.
    async fn flush_db(&self) -> StoreResult<()>;
}
