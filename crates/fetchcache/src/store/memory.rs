use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{ScanPage, SetCondition, SetOptions, Store, StoreResult};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

/// An in-process [`Store`].
///
/// Keys are kept in sorted order, which makes [`Store::scan`] cursors plain offsets into the key
/// space. Expired keys are hidden from all reads and are dropped on the next write.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all live entries.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        let now = Instant::now();
        self.entries
            .lock()
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    /// Replaces the contents of the store with `contents`, none of which expire.
    pub fn replace(&self, contents: BTreeMap<String, String>) {
        let entries = contents
            .into_iter()
            .map(|(key, value)| {
                let entry = MemoryEntry {
                    value,
                    expires_at: None,
                };
                (key, entry)
            })
            .collect();
        *self.entries.lock() = entries;
    }

    fn read(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock();
        let entry = entries.get(key)?;
        entry
            .is_live(Instant::now())
            .then(|| entry.value.clone())
    }

    /// Writes `value` according to `options`, returning whether it was written.
    pub(super) fn write(&self, key: &str, value: &str, options: &SetOptions) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.is_live(now));

        let existing = entries.get(key);
        let allowed = match options.condition {
            None => true,
            Some(SetCondition::NotExists) => existing.is_none(),
            Some(SetCondition::Exists) => existing.is_some(),
        };
        if !allowed {
            return false;
        }

        let expires_at = match options.expiry {
            Some(expiry) => Some(now + expiry),
            None if options.keep_ttl => existing.and_then(|entry| entry.expires_at),
            None => None,
        };
        let entry = MemoryEntry {
            value: value.to_owned(),
            expires_at,
        };
        entries.insert(key.to_owned(), entry);
        true
    }

    pub(super) fn write_many(&self, pairs: &[(String, String)]) {
        let mut entries = self.entries.lock();
        for (key, value) in pairs {
            let entry = MemoryEntry {
                value: value.clone(),
                expires_at: None,
            };
            entries.insert(key.clone(), entry);
        }
    }

    pub(super) fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.read(key))
    }

    async fn set(&self, key: &str, value: &str, options: &SetOptions) -> StoreResult<()> {
        self.write(key, value, options);
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        Ok(keys.iter().map(|key| self.read(key)).collect())
    }

    async fn mset(&self, pairs: &[(String, String)]) -> StoreResult<()> {
        self.write_many(pairs);
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage> {
        let pattern = glob::Pattern::new(pattern)?;
        let count = count.max(1);
        let start = usize::try_from(cursor).unwrap_or(usize::MAX);

        let now = Instant::now();
        let entries = self.entries.lock();
        let mut keys = Vec::new();
        let mut visited = 0;
        for (key, entry) in entries.iter().skip(start).take(count) {
            visited += 1;
            if entry.is_live(now) && pattern.matches(key) {
                keys.push(key.clone());
            }
        }

        let next = start.saturating_add(visited);
        let cursor = if visited < count || next >= entries.len() {
            0
        } else {
            next as u64
        };
        Ok(ScanPage { cursor, keys })
    }

    async fn flush_db(&self) -> StoreResult<()> {
        self.clear();
        Ok(())
    }
}
