use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::store::{DEFAULT_SCAN_COUNT, Store};

use super::cache_key::owning_fetcher;
use super::codec::ValueProcessors;
use super::error::Error;

/// The outcome of revalidating a single cached value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevalidationResult {
    /// The effective cache key.
    pub key: String,
    /// Whether the value processor of the owning fetcher accepts the cached value.
    pub is_valid: bool,
    /// The decoded value if it is valid, the raw cached string otherwise.
    pub parsed_value: Value,
}

/// Checks whether all values cached under a prefix can still be decoded.
///
/// Every key under the prefix is attributed to the first fetcher whose key, followed by `:`,
/// starts the remainder of the key. Keys without such a fetcher do not belong to this cache and
/// are skipped. Invalid values are only reported, never fetched again.
#[derive(Debug)]
pub struct Revalidator<'a> {
    store: &'a dyn Store,
    prefix: &'a str,
    fetchers: Vec<&'a str>,
    value_processors: &'a ValueProcessors,
}

impl<'a> Revalidator<'a> {
    pub fn new(
        store: &'a dyn Store,
        prefix: &'a str,
        fetchers: Vec<&'a str>,
        value_processors: &'a ValueProcessors,
    ) -> Self {
        Self {
            store,
            prefix,
            fetchers,
            value_processors,
        }
    }

    /// Scans the store and revalidates every value owned by one of the fetchers.
    ///
    /// Fails with [`Error::MissingPrefix`] before touching the store if the prefix is empty, as
    /// there would be no way to tell the keys of this cache apart from any others.
    pub async fn run(&self) -> Result<Vec<RevalidationResult>, Error> {
        if self.prefix.is_empty() {
            return Err(Error::MissingPrefix);
        }

        let keys = self.scan_keys().await?;
        if keys.is_empty() {
            tracing::info!(prefix = self.prefix, "No cached values to revalidate");
            return Ok(vec![]);
        }
        let values = self.store.mget(&keys).await?;

        let mut results = Vec::with_capacity(keys.len());
        for (key, value) in keys.into_iter().zip(values) {
            let Some(fetcher) = owning_fetcher(self.prefix, &key, self.fetchers.iter().copied())
            else {
                tracing::trace!(%key, "Skipping key without a matching fetcher");
                continue;
            };
            // the key may have expired since the scan
            let Some(raw) = value else {
                continue;
            };

            let result = self.revalidate(fetcher, key, raw);
            metric!(
                counter("revalidate.keys") += 1,
                "fetcher" => fetcher,
                "valid" => if result.is_valid { "true" } else { "false" },
            );
            results.push(result);
        }

        let invalid = results.iter().filter(|result| !result.is_valid).count();
        tracing::info!(
            prefix = self.prefix,
            total = results.len(),
            invalid,
            "Revalidated cached values"
        );
        Ok(results)
    }

    /// Collects all keys under the prefix, across all scan pages.
    async fn scan_keys(&self) -> Result<Vec<String>, Error> {
        let pattern = format!("{}*", self.prefix);
        // the same key may be returned on more than one page
        let mut keys = BTreeSet::new();
        let mut cursor = 0;
        loop {
            let page = self
                .store
                .scan(cursor, &pattern, DEFAULT_SCAN_COUNT)
                .await?;
            keys.extend(page.keys);
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys.into_iter().collect())
    }

    fn revalidate(&self, fetcher: &str, key: String, raw: String) -> RevalidationResult {
        let Some(codec) = self.value_processors.get(fetcher) else {
            return RevalidationResult {
                key,
                is_valid: true,
                parsed_value: Value::String(raw),
            };
        };

        match codec.decode(&raw) {
            Ok(parsed_value) => RevalidationResult {
                key,
                is_valid: true,
                parsed_value,
            },
            Err(err) => {
                tracing::debug!(%key, %err, "Cached value is invalid");
                RevalidationResult {
                    key,
                    is_valid: false,
                    parsed_value: Value::String(raw),
                }
            }
        }
    }
}
