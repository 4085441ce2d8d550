use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use super::error::Error;

/// A typed handle to a fetcher.
///
/// The handle ties the fetcher key, which addresses the fetcher and prefixes its cache keys, to
/// the parameters `P` the fetcher is called with and the value `T` it resolves to. Handles are
/// meant to be declared as constants:
///
/// ```
/// use fetchcache::FetcherKey;
///
/// const USER: FetcherKey<u64, String> = FetcherKey::new("user");
/// ```
pub struct FetcherKey<P, T> {
    name: &'static str,
    _signature: PhantomData<fn(P) -> T>,
}

impl<P, T> FetcherKey<P, T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _signature: PhantomData,
        }
    }

    /// The fetcher key.
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

// Manual impls, as derives would require `P` and `T` to implement these too.
impl<P, T> Clone for FetcherKey<P, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P, T> Copy for FetcherKey<P, T> {}

impl<P, T> fmt::Debug for FetcherKey<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FetcherKey").field(&self.name).finish()
    }
}

/// The future returned by a registered fetcher.
pub type FetchFuture<T> = BoxFuture<'static, anyhow::Result<T>>;

pub(crate) type FetchFn<P, T> = Arc<dyn Fn(P) -> FetchFuture<T> + Send + Sync>;

/// The set of fetchers a [`FetchCache`](super::FetchCache) serves.
///
/// Each fetcher is registered under its [`FetcherKey`] and keeps its concrete signature; calling a
/// fetcher key with a different signature than it was registered with is reported as
/// [`Error::SignatureMismatch`].
#[derive(Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
    /// Fetcher keys in registration order.
    order: Vec<&'static str>,
}

impl fmt::Debug for FetcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.order).finish()
    }
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `fetcher` under `key`, replacing a previous fetcher with the same key.
    pub fn register<P, T, F, Fut>(mut self, key: FetcherKey<P, T>, fetcher: F) -> Self
    where
        P: 'static,
        T: 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let fetch: FetchFn<P, T> = Arc::new(move |params| fetcher(params).boxed());
        if self.fetchers.insert(key.name(), Box::new(fetch)).is_none() {
            self.order.push(key.name());
        }
        self
    }

    /// Returns all fetcher keys, in registration order.
    pub fn keys(&self) -> &[&'static str] {
        &self.order
    }

    pub(crate) fn get<P: 'static, T: 'static>(
        &self,
        key: FetcherKey<P, T>,
    ) -> Result<FetchFn<P, T>, Error> {
        let fetcher = self
            .fetchers
            .get(key.name())
            .ok_or_else(|| Error::UnknownFetcher(key.name().to_owned()))?;
        fetcher
            .downcast_ref::<FetchFn<P, T>>()
            .cloned()
            .ok_or_else(|| Error::SignatureMismatch(key.name().to_owned()))
    }
}
