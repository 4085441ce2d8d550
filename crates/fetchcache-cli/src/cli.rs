//! Exposes the command line application.
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fetchcache::config::Config;
use fetchcache::metrics;

use crate::cache;
use crate::logging;

/// Fetch cache commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Check whether all values cached under the configured prefix can be decoded.
    ///
    /// Prints one JSON object per cached value.
    Revalidate {
        /// Fail if any cached value is invalid.
        #[arg(long)]
        strict: bool,
    },

    /// Print the raw value cached under a key, relative to the configured prefix.
    Get {
        /// The cache key without the prefix, like `user:42`.
        key: String,
    },

    /// Remove all keys from the configured store.
    Flush,
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(name = "fetchcache", version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: We are still single-threaded, the runtime is only started below.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        let mut tags = config.metrics.custom_tags.clone();
        if let Some(tag) = config.metrics.hostname_tag.clone() {
            let hostname = hostname::get().ok().and_then(|s| s.into_string().ok());
            tags.extend(hostname.map(|name| (tag, name)));
        }
        if let Some(tag) = config.metrics.environment_tag.clone() {
            let environment = sentry.options().environment.as_ref();
            tags.extend(environment.map(|name| (tag, name.to_string())));
        }
        metrics::configure_statsd(&config.metrics.prefix, statsd, tags)
            .context("failed to configure statsd")?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the runtime")?;

    runtime.block_on(run(&config, cli.command))
}

async fn run(config: &Config, command: Command) -> Result<()> {
    let mut stdout = io::stdout().lock();
    match command {
        Command::Revalidate { strict } => {
            let invalid = cache::revalidate(config, &mut stdout).await?;
            if strict && invalid > 0 {
                anyhow::bail!("{invalid} cached values are invalid");
            }
        }
        Command::Get { key } => cache::get(config, &key, &mut stdout).await?,
        Command::Flush => cache::flush(config).await?,
    }
    Ok(())
}
