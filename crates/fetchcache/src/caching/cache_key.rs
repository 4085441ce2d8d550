use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use super::error::Error;
use super::fetcher::FetcherKey;

type KeyFn<P> = Box<dyn Fn(&P) -> String + Send + Sync>;

/// The registry of key processors, keyed by fetcher key.
///
/// A key processor derives the cache key suffix from the parameters a fetcher is called with.
/// Fetchers without a key processor are cached under their bare fetcher key.
#[derive(Default)]
pub struct KeyProcessors {
    processors: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl fmt::Debug for KeyProcessors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.processors.keys()).finish()
    }
}

impl KeyProcessors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the key processor for the fetcher `key`.
    ///
    /// The processor must be deterministic: equal parameters have to produce equal suffixes, as
    /// the derived key addresses both the store and the in-flight computations.
    pub fn register<P, T, F>(mut self, key: FetcherKey<P, T>, processor: F) -> Self
    where
        P: 'static,
        F: Fn(&P) -> String + Send + Sync + 'static,
    {
        let processor: KeyFn<P> = Box::new(processor);
        self.processors.insert(key.name(), Box::new(processor));
        self
    }

    fn suffix<P: 'static>(&self, fetcher: &str, params: &P) -> Result<Option<String>, Error> {
        let Some(processor) = self.processors.get(fetcher) else {
            return Ok(None);
        };
        let processor = processor
            .downcast_ref::<KeyFn<P>>()
            .ok_or_else(|| Error::SignatureMismatch(fetcher.to_owned()))?;
        Ok(Some(processor(params)))
    }
}

/// Derives effective cache keys.
///
/// The effective key is `<prefix><fetcher>` or `<prefix><fetcher>:<suffix>` when a key processor
/// is registered for the fetcher.
#[derive(Debug, Default)]
pub struct KeyDeriver {
    prefix: String,
    processors: KeyProcessors,
}

impl KeyDeriver {
    pub fn new(prefix: impl Into<String>, processors: KeyProcessors) -> Self {
        Self {
            prefix: prefix.into(),
            processors,
        }
    }

    pub fn with_prefix(self, prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..self
        }
    }

    pub fn with_processors(self, processors: KeyProcessors) -> Self {
        Self { processors, ..self }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn derive<P: 'static, T>(
        &self,
        key: FetcherKey<P, T>,
        params: &P,
    ) -> Result<String, Error> {
        let suffix = self.processors.suffix(key.name(), params)?;
        Ok(effective_key(&self.prefix, key.name(), suffix.as_deref()))
    }
}

fn effective_key(prefix: &str, fetcher: &str, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) => format!("{prefix}{fetcher}:{suffix}"),
        None => format!("{prefix}{fetcher}"),
    }
}

/// Finds the fetcher owning the effective `key`.
///
/// The key has to start with `prefix`, followed by one of the `fetchers` and a `:`. The first
/// matching fetcher wins.
pub(crate) fn owning_fetcher<'a, I>(prefix: &str, key: &str, fetchers: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let rest = key.strip_prefix(prefix)?;
    fetchers.into_iter().find(|fetcher| {
        rest.strip_prefix(fetcher)
            .is_some_and(|suffix| suffix.starts_with(':'))
    })
}
