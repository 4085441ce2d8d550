//! Operations on the configured store.
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use fetchcache::config::Config;
use fetchcache::{Revalidator, Store, ValueProcessors};

/// Creates and connects the configured store.
async fn connect(config: &Config) -> Result<Arc<dyn Store>> {
    let store = config.store.build().context("failed to create the store")?;
    store
        .connect()
        .await
        .with_context(|| format!("failed to connect to the {} store", store.name()))?;
    Ok(store)
}

/// Revalidates all values cached under the configured prefix.
///
/// Writes one JSON object per revalidated value to `out`, and returns the number of invalid
/// values. Cached values are attributed to the fetchers named in the configuration.
pub async fn revalidate(config: &Config, out: &mut impl Write) -> Result<usize> {
    let store = connect(config).await?;
    let value_processors = ValueProcessors::from_kinds(&config.fetchers);
    let fetchers = config.fetchers.keys().map(String::as_str).collect();

    let results = Revalidator::new(
        store.as_ref(),
        &config.cache.prefix,
        fetchers,
        &value_processors,
    )
    .run()
    .await
    .context("failed to revalidate cached values")?;
    store.disconnect().await?;

    for result in &results {
        serde_json::to_writer(&mut *out, result)?;
        writeln!(out)?;
    }

    let invalid = results.iter().filter(|result| !result.is_valid).count();
    if invalid > 0 {
        tracing::warn!(invalid, "Found invalid cached values");
    }
    Ok(invalid)
}

/// Writes the raw value cached under the prefixed `key` to `out`.
pub async fn get(config: &Config, key: &str, out: &mut impl Write) -> Result<()> {
    let store = connect(config).await?;
    let key = format!("{}{key}", config.cache.prefix);
    let value = store.get(&key).await?;
    store.disconnect().await?;

    let value = value.with_context(|| format!("no value cached under `{key}`"))?;
    writeln!(out, "{value}")?;
    Ok(())
}

/// Removes all keys from the configured store.
pub async fn flush(config: &Config) -> Result<()> {
    let store = connect(config).await?;
    store.flush_db().await.context("failed to flush the store")?;
    store.disconnect().await?;
    tracing::info!(store = store.name(), "Flushed the store");
    Ok(())
}
