use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

/// The original error of a failed fetcher, shared by every caller that joined its computation.
pub type FetcherError = Arc<dyn StdError + Send + Sync + 'static>;

/// An error returned from [`FetchCache`](super::FetchCache) operations.
///
/// Errors are `Clone`, as the outcome of a single coalesced computation is handed to every
/// caller which joined it.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A fetcher resolved with a value for which no default codec can be derived.
    ///
    /// Register an explicit value processor for the fetcher to fix this.
    #[error(
        "fetcher `{fetcher}` returned a {value_type}, which has no default cache value processor; \
         register an explicit one for this fetcher"
    )]
    UnsupportedValueType {
        fetcher: String,
        value_type: &'static str,
    },
    /// The fetcher itself failed.
    #[error("fetcher `{fetcher}` failed")]
    Fetcher {
        fetcher: String,
        #[source]
        source: FetcherError,
    },
    /// The fetcher did not settle within the configured fetch timeout.
    #[error("fetcher `{fetcher}` timed out after {timeout:?}")]
    Timeout { fetcher: String, timeout: Duration },
    /// Revalidation was requested without a key prefix to scope it.
    #[error("revalidation requires a key prefix to be configured")]
    MissingPrefix,
    #[error("no fetcher registered for `{0}`")]
    UnknownFetcher(String),
    /// The same fetcher key was used with two different parameter or result types.
    #[error("fetcher `{0}` is registered with a different signature")]
    SignatureMismatch(String),
    /// A fetched value could not be converted from or to its JSON representation.
    #[error("failed to convert the value of fetcher `{fetcher}`")]
    Serialize {
        fetcher: String,
        #[source]
        source: Arc<serde_json::Error>,
    },
    /// The computation for a key went away without reporting a result.
    #[error("computation for `{0}` was dropped")]
    Interrupted(String),
    #[error(transparent)]
    Store(Arc<StoreError>),
}

impl Error {
    pub(crate) fn serialize(fetcher: &str, err: serde_json::Error) -> Self {
        Self::Serialize {
            fetcher: fetcher.to_owned(),
            source: Arc::new(err),
        }
    }

    pub(crate) fn fetcher(fetcher: &str, err: anyhow::Error) -> Self {
        let source: Box<dyn StdError + Send + Sync + 'static> = err.into();
        Self::Fetcher {
            fetcher: fetcher.to_owned(),
            source: Arc::from(source),
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Self::Store(Arc::new(err))
    }
}

/// A cached value could not be decoded by its codec.
///
/// The fetch path treats this like a cache miss.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed cache value: {0}")]
pub struct DecodeError(String);

impl DecodeError {
    pub fn new(message: impl fmt::Display) -> Self {
        Self(message.to_string())
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err)
    }
}
