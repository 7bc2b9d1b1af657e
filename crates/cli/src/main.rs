//! schoolintel command-line entry point.
//!
//! Reports lookup cache health and runs maintenance against the configured
//! store. Logging goes to stderr so `--json` output on stdout stays parseable.

use anyhow::{Context, Result};
use clap::Parser;
use schoolintel_core::{AppConfig, LookupCache};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    init_tracing(cli.log_json);

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(Some(path.as_path())),
        None => AppConfig::load(),
    }
    .context("loading configuration")?;

    tracing::debug!(path = %config.cache_path().display(), enabled = config.enable_cache, "configuration loaded");

    let cache = LookupCache::open(&config).await;
    let output = commands::run(&cache, &cli.command, cli.json).await?;
    println!("{output}");

    Ok(())
}
