//! The `fetchcache` command line tool.
//!
//! Inspects and maintains the store behind a fetch cache: revalidates cached values, prints single
//! values, and flushes the store.

#![warn(
    missing_docs,
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cache;
mod cli;
mod logging;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
