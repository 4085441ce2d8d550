//! A request-coalescing, cache-aside fetch layer in front of a remote key-value store.
//!
//! See the [`caching`] module for how fetches are served, and [`store`] for the supported stores.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod store;

pub use caching::{
    Codec, CodecKind, DecodeError, Error, FetchCache, FetchHooks, FetchRequest, FetcherKey,
    FetcherRegistry, KeyProcessors, RevalidationResult, Revalidator, ValueProcessors,
};
pub use store::{SetCondition, SetOptions, Store, StoreConfig, StoreError};
