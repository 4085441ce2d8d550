use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::CacheConfig;
use crate::store::{SetOptions, Store};

use super::cache_key::{KeyDeriver, KeyProcessors};
use super::codec::{Codec, ValueProcessors, encode_value};
use super::error::{DecodeError, Error};
use super::fetcher::{FetchFn, FetcherKey, FetcherRegistry};
use super::in_flight::{self, ComputationResult, InFlightTable, Join, PendingFetch};
use super::revalidate::{RevalidationResult, Revalidator};

/// Notifications about how a fetch was served.
///
/// All methods default to doing nothing.
pub trait FetchHooks: Send + Sync {
    /// A non-empty value was read from the store for `key`.
    ///
    /// This fires before the value is decoded, so a corrupt value that ends up being fetched
    /// again is reported here as well.
    fn on_cache_hit(&self, _key: &str, _cached: &str) {}

    /// A fetch for `key` joined a computation which was already in flight.
    fn on_existing_promise_hit(&self, _key: &str, _pending: &PendingFetch) {}
}

/// [`FetchHooks`] which ignore all notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl FetchHooks for NoopHooks {}

impl<H: FetchHooks + ?Sized> FetchHooks for Arc<H> {
    fn on_cache_hit(&self, key: &str, cached: &str) {
        (**self).on_cache_hit(key, cached)
    }

    fn on_existing_promise_hit(&self, key: &str, pending: &PendingFetch) {
        (**self).on_existing_promise_hit(key, pending)
    }
}

/// A single fetch: the fetcher, its parameters, and the options used to write a fetched value.
pub struct FetchRequest<P, T> {
    pub key: FetcherKey<P, T>,
    pub params: P,
    /// Overrides the cache wide [`SetOptions`] for this request.
    pub set_options: Option<SetOptions>,
}

impl<P, T> FetchRequest<P, T> {
    pub fn new(key: FetcherKey<P, T>, params: P) -> Self {
        Self {
            key,
            params,
            set_options: None,
        }
    }

    pub fn with_set_options(mut self, set_options: SetOptions) -> Self {
        self.set_options = Some(set_options);
        self
    }
}

impl<P: fmt::Debug, T> fmt::Debug for FetchRequest<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchRequest")
            .field("key", &self.key)
            .field("params", &self.params)
            .field("set_options", &self.set_options)
            .finish()
    }
}

/// A request-coalescing, cache-aside fetch layer.
///
/// See the [module docs](super) for how a fetch is served.
pub struct FetchCache {
    store: Arc<dyn Store>,
    fetchers: FetcherRegistry,
    keys: KeyDeriver,
    value_processors: Arc<ValueProcessors>,
    hooks: Arc<dyn FetchHooks>,
    in_flight: InFlightTable,
    fetch_timeout: Option<Duration>,
    set_options: SetOptions,
}

impl fmt::Debug for FetchCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchCache")
            .field("store", &self.store)
            .field("fetchers", &self.fetchers)
            .field("keys", &self.keys)
            .field("value_processors", &self.value_processors)
            .field("in_flight", &self.in_flight)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("set_options", &self.set_options)
            .finish_non_exhaustive()
    }
}

impl FetchCache {
    pub fn new(store: Arc<dyn Store>, fetchers: FetcherRegistry) -> Self {
        Self {
            store,
            fetchers,
            keys: KeyDeriver::default(),
            value_processors: Default::default(),
            hooks: Arc::new(NoopHooks),
            in_flight: InFlightTable::default(),
            fetch_timeout: None,
            set_options: SetOptions::default(),
        }
    }

    /// Creates a cache with the prefix, timeout and write options from `config`.
    pub fn from_config(
        store: Arc<dyn Store>,
        fetchers: FetcherRegistry,
        config: &CacheConfig,
    ) -> Self {
        Self::new(store, fetchers)
            .with_prefix(config.prefix.clone())
            .with_fetch_timeout(config.fetch_timeout)
            .with_set_options(config.set_options.clone())
    }

    /// Prepends `prefix` to every cache key. Required for [`revalidate`](Self::revalidate).
    pub fn with_prefix(self, prefix: impl Into<String>) -> Self {
        Self {
            keys: self.keys.with_prefix(prefix),
            ..self
        }
    }

    pub fn with_key_processors(self, processors: KeyProcessors) -> Self {
        Self {
            keys: self.keys.with_processors(processors),
            ..self
        }
    }

    pub fn with_value_processors(self, processors: ValueProcessors) -> Self {
        Self {
            value_processors: Arc::new(processors),
            ..self
        }
    }

    pub fn with_hooks(self, hooks: impl FetchHooks + 'static) -> Self {
        Self {
            hooks: Arc::new(hooks),
            ..self
        }
    }

    /// Bounds how long a single fetcher may run. `None` waits forever.
    pub fn with_fetch_timeout(self, fetch_timeout: Option<Duration>) -> Self {
        Self {
            fetch_timeout,
            ..self
        }
    }

    /// The options fetched values are written with, unless a request overrides them.
    pub fn with_set_options(self, set_options: SetOptions) -> Self {
        Self {
            set_options,
            ..self
        }
    }

    pub async fn connect(&self) -> Result<(), Error> {
        self.store.connect().await?;
        tracing::debug!(store = self.store.name(), "Connected to the store");
        Ok(())
    }

    /// Forgets all computations in flight and removes everything from the store.
    pub async fn cleanup(&self) -> Result<(), Error> {
        self.in_flight.clear();
        self.store.flush_db().await?;
        Ok(())
    }

    /// Forgets all computations in flight and disconnects from the store.
    pub async fn teardown(&self) -> Result<(), Error> {
        self.in_flight.clear();
        self.store.disconnect().await?;
        Ok(())
    }

    /// Returns the effective cache key of `key` called with `params`.
    pub fn derive_key<P: 'static, T>(
        &self,
        key: FetcherKey<P, T>,
        params: &P,
    ) -> Result<String, Error> {
        self.keys.derive(key, params)
    }

    /// Returns the value processor currently registered for the fetcher `key`.
    pub fn value_processor(&self, key: &str) -> Option<Codec> {
        self.value_processors.get(key)
    }

    /// Registers the value processor for the fetcher `key`, replacing any existing one.
    pub fn set_value_processor(&self, key: impl Into<String>, codec: Codec) {
        self.value_processors.set(key, codec);
    }

    /// Registers all value processors of `processors`, replacing existing ones.
    pub fn set_value_processors(&self, processors: ValueProcessors) {
        self.value_processors.extend(processors);
    }

    /// Fetches the value of `key` for `params`.
    pub async fn fetch<P, T>(&self, key: FetcherKey<P, T>, params: P) -> Result<T, Error>
    where
        P: Send + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        self.fetch_with(FetchRequest::new(key, params)).await
    }

    /// Fetches the value of a single [`FetchRequest`].
    ///
    /// A valid cached value is returned right away. Otherwise, the value is computed by the
    /// fetcher, unless a computation for the same cache key is already in flight, in which case
    /// its result is shared.
    pub async fn fetch_with<P, T>(&self, request: FetchRequest<P, T>) -> Result<T, Error>
    where
        P: Send + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let cache_key = self.keys.derive(request.key, &request.params)?;
        tracing::trace!(fetcher = request.key.name(), %cache_key, "Fetching");

        let cached = self.store.get(&cache_key).await?;
        self.lookup(request, cache_key, cached)?.resolve().await
    }

    /// Fetches all `requests` at once.
    ///
    /// All cached values are read with a single batched read. The results are in the order of
    /// `requests`; requests with the same cache key share a single computation.
    pub async fn fetch_multiple<P, T>(
        &self,
        requests: Vec<FetchRequest<P, T>>,
    ) -> Result<Vec<T>, Error>
    where
        P: Send + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        metric!(histogram("fetch.multiple.size") = requests.len() as u64);
        if requests.is_empty() {
            return Ok(vec![]);
        }

        let cache_keys = requests
            .iter()
            .map(|request| self.keys.derive(request.key, &request.params))
            .collect::<Result<Vec<_>, _>>()?;
        let cached = self.store.mget(&cache_keys).await?;

        // Every request joins the in-flight table before anything is awaited, so duplicates
        // within the batch always find the computation of the first one.
        let lookups = requests
            .into_iter()
            .zip(cache_keys)
            .zip(cached)
            .map(|((request, cache_key), cached)| self.lookup(request, cache_key, cached))
            .collect::<Result<Vec<_>, _>>()?;
        future::try_join_all(lookups.into_iter().map(Lookup::resolve)).await
    }

    /// Revalidates all values cached under the prefix.
    ///
    /// See [`Revalidator`] for details.
    pub async fn revalidate(&self) -> Result<Vec<RevalidationResult>, Error> {
        Revalidator::new(
            self.store.as_ref(),
            self.keys.prefix(),
            self.fetchers.keys().to_vec(),
            &self.value_processors,
        )
        .run()
        .await
    }

    /// Serves a request from what was read from the store for its `cache_key`, or joins the
    /// computation of its value.
    ///
    /// This never awaits, so the in-flight table is joined as soon as this returns.
    fn lookup<P, T>(
        &self,
        request: FetchRequest<P, T>,
        cache_key: String,
        cached: Option<String>,
    ) -> Result<Lookup<T>, Error>
    where
        P: Send + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let fetcher = request.key.name();
        metric!(counter("fetch.access") += 1, "fetcher" => fetcher);

        match cached.filter(|cached| !cached.is_empty()) {
            Some(cached) => {
                self.hooks.on_cache_hit(&cache_key, &cached);
                match self.decode_cached(fetcher, &cached) {
                    Ok(value) => {
                        metric!(counter("fetch.cache.hit") += 1, "fetcher" => fetcher);
                        tracing::trace!(%cache_key, "Serving value from the cache");
                        return Ok(Lookup::Cached(value));
                    }
                    Err(err) => {
                        metric!(counter("fetch.cache.corrupt") += 1, "fetcher" => fetcher);
                        tracing::warn!(
                            %cache_key,
                            error = &err as &dyn std::error::Error,
                            "Discarding cached value"
                        );
                    }
                }
            }
            None => {
                metric!(counter("fetch.cache.miss") += 1, "fetcher" => fetcher);
                tracing::trace!(%cache_key, "Cache miss");
            }
        }

        let pending = self.join_computation(request, &cache_key)?;
        Ok(Lookup::Pending {
            fetcher,
            cache_key,
            pending,
        })
    }

    /// Decodes a cached value with the value processor of `fetcher`.
    ///
    /// Without a value processor, the cached string is taken as is.
    fn decode_cached<T: DeserializeOwned>(
        &self,
        fetcher: &str,
        cached: &str,
    ) -> Result<T, DecodeError> {
        let value = match self.value_processors.get(fetcher) {
            Some(codec) => codec.decode(cached)?,
            None => Value::String(cached.to_owned()),
        };
        Ok(serde_json::from_value(value)?)
    }

    fn join_computation<P, T>(
        &self,
        request: FetchRequest<P, T>,
        cache_key: &str,
    ) -> Result<PendingFetch, Error>
    where
        P: Send + 'static,
        T: Serialize + Send + 'static,
    {
        let FetchRequest {
            key,
            params,
            set_options,
        } = request;

        let computation = Computation {
            fetcher: key.name(),
            fetch: self.fetchers.get(key)?,
            params,
            cache_key: cache_key.to_owned(),
            store: Arc::clone(&self.store),
            value_processors: Arc::clone(&self.value_processors),
            set_options: set_options.unwrap_or_else(|| self.set_options.clone()),
            timeout: self.fetch_timeout,
        };

        let pending = match self.in_flight.join(cache_key, move || computation.run()) {
            Join::Joined(pending) => {
                metric!(counter("fetch.channel.hit") += 1, "fetcher" => key.name());
                tracing::debug!(cache_key, "Joining computation in flight");
                self.hooks.on_existing_promise_hit(cache_key, &pending);
                pending
            }
            Join::Spawned(pending) => {
                metric!(counter("fetch.channel.miss") += 1, "fetcher" => key.name());
                pending
            }
        };

        Ok(pending)
    }
}

/// A request that was either served from the cache or is waiting for a computation.
enum Lookup<T> {
    Cached(T),
    Pending {
        fetcher: &'static str,
        cache_key: String,
        pending: PendingFetch,
    },
}

impl<T: DeserializeOwned> Lookup<T> {
    async fn resolve(self) -> Result<T, Error> {
        match self {
            Lookup::Cached(value) => Ok(value),
            Lookup::Pending {
                fetcher,
                cache_key,
                pending,
            } => {
                let value = in_flight::wait(&cache_key, pending).await?;
                serde_json::from_value(value).map_err(|err| Error::serialize(fetcher, err))
            }
        }
    }
}

/// Fetches a value and persists it in the store.
struct Computation<P, T> {
    fetcher: &'static str,
    fetch: FetchFn<P, T>,
    params: P,
    cache_key: String,
    store: Arc<dyn Store>,
    value_processors: Arc<ValueProcessors>,
    set_options: SetOptions,
    timeout: Option<Duration>,
}

impl<P, T: Serialize> Computation<P, T> {
    async fn run(self) -> ComputationResult {
        let fetcher = self.fetcher;
        let start = Instant::now();
        let result = self.compute().await;

        let status = match &result {
            Ok(_) => "ok",
            Err(Error::Timeout { .. }) => "timeout",
            Err(_) => "error",
        };
        metric!(counter("fetch.computation") += 1, "fetcher" => fetcher, "status" => status);
        metric!(timer("fetch.computation.duration") = start.elapsed(), "fetcher" => fetcher);
        if let Err(err) = &result {
            tracing::error!(
                fetcher,
                error = err as &dyn std::error::Error,
                "Fetch computation failed"
            );
        }

        result
    }

    async fn compute(self) -> ComputationResult {
        let Self {
            fetcher,
            fetch,
            params,
            cache_key,
            store,
            value_processors,
            set_options,
            timeout,
        } = self;

        let fetched = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, fetch(params))
                .await
                .map_err(|_elapsed| Error::Timeout {
                    fetcher: fetcher.to_owned(),
                    timeout,
                })?,
            None => fetch(params).await,
        };
        let fetched = fetched.map_err(|err| Error::fetcher(fetcher, err))?;
        let value = serde_json::to_value(&fetched).map_err(|err| Error::serialize(fetcher, err))?;
        drop(fetched);

        store
            .set(&cache_key, &encode_value(&value), &set_options)
            .await?;
        value_processors.get_or_install_default(fetcher, &value)?;

        Ok(value)
    }
}
