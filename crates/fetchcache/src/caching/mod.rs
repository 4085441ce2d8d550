//! # Fetch caching
//!
//! A [`FetchCache`] sits in front of a set of asynchronous *fetchers*, and caches their results in
//! a remote string valued [`Store`](crate::store::Store). Its job is to turn repeated fetches of
//! the same value into at most one store read, at most one concurrent fetcher invocation per
//! distinct set of parameters, and a single store write.
//!
//! ## Cache keys
//!
//! Each fetcher is registered under a [`FetcherKey`] in the [`FetcherRegistry`]. A fetch for a
//! fetcher key and its parameters is addressed by its *effective key*:
//!
//! - `<prefix><fetcher>` if there is no key processor for the fetcher, or
//! - `<prefix><fetcher>:<suffix>`, where the suffix is derived from the parameters by the key
//!   processor registered in [`KeyProcessors`].
//!
//! The effective key addresses both the store, and the computations currently in flight. Key
//! processors thus have to be deterministic.
//!
//! ## Serving a fetch
//!
//! - First, the effective key is read from the store. A non-empty value is decoded with the value
//!   processor ([`Codec`]) of the fetcher, or taken as a plain string if there is none.
//! - If the value can not be decoded, it is treated as if it was missing.
//! - On a miss, the fetch joins the computation in flight for its effective key. If there is none,
//!   a new computation is spawned, which invokes the fetcher, writes the result to the store, and
//!   installs a default value processor for the fetcher if it has none yet.
//! - All fetches that joined the computation observe the same value or the same error. The
//!   computation is forgotten once it settled, so a failed fetch is retried from scratch by the
//!   next caller.
//!
//! [`FetchCache::fetch_multiple`] does the same for a batch of requests, with a single batched
//! store read.
//!
//! ## Value processors
//!
//! Values are written to the store as their JSON representation, except for strings which are
//! written as is. Unless a value processor was registered explicitly, it is derived from the first
//! value a fetcher resolves with: numbers are parsed as numbers, strings are kept as is, and
//! anything else is parsed as JSON. Booleans have no default and need an explicit value processor.
//!
//! ## Revalidation
//!
//! [`FetchCache::revalidate`] (or a standalone [`Revalidator`]) scans every key under the prefix
//! and reports whether its value can still be decoded. It refuses to run without a prefix.
//!
//! ### Metrics
//!
//! All metrics are tagged with the `fetcher` they belong to:
//!
//! - `fetch.access`: All fetches.
//! - `fetch.cache.hit`: Fetches served from the store.
//! - `fetch.cache.miss`: Fetches without a cached value.
//! - `fetch.cache.corrupt`: Fetches with a cached value that could not be decoded.
//! - `fetch.channel.hit`: Fetches that joined a computation in flight.
//! - `fetch.channel.miss`: Fetches that spawned a new computation.
//! - `fetch.computation`: Finished computations, tagged with their `status`.
//! - `fetch.computation.duration`: A timer of how long computations took, including the write.
//! - `fetch.multiple.size`: A histogram of batch sizes of `fetch_multiple` (untagged).
//! - `revalidate.keys`: Revalidated keys, tagged by whether they are `valid`.

mod cache_key;
mod client;
mod codec;
mod error;
mod fetcher;
mod in_flight;
mod revalidate;


pub use cache_key::{KeyDeriver, KeyProcessors};
pub use client::{FetchCache, FetchHooks, FetchRequest, NoopHooks};
pub use codec::{Codec, CodecKind, DecodeFn, ValueProcessors, encode_value};
pub use error::{DecodeError, Error, FetcherError};
pub use fetcher::{FetchFuture, FetcherKey, FetcherRegistry};
pub use in_flight::{ComputationResult, PendingFetch};
pub use revalidate::{RevalidationResult, Revalidator};
