//! Helpers for testing the fetch cache.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. The directory is removed as soon as the handle is dropped. To
//!    keep it around, assign it to a variable in the test function
//!    (e.g. `let _store_dir = test::tempdir()`).
//!
//!  - Tests talking to a real redis server only run when [`redis_url`] returns a URL.

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `fetchcache` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("fetchcache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped. Use it as a guard to
/// automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// The URL of the redis server to run tests against.
///
/// This is read from the `FETCHCACHE_REDIS_URL` environment variable. Tests requiring redis
/// should return early if this is `None`.
pub fn redis_url() -> Option<String> {
    std::env::var("FETCHCACHE_REDIS_URL")
        .ok()
        .filter(|url| !url.is_empty())
}
