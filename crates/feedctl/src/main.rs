//! feedctl - inspect and modify a feed cache store

mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use feedcache::{FeedCache, StoreLocation};
use tracing::info;

use crate::commands::Command;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./data")]
    data: String,

    /// Use a throwaway in-memory store instead of the data directory
    #[arg(long)]
    in_memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let location = if args.in_memory {
        StoreLocation::InMemory
    } else {
        StoreLocation::path(&args.data)
    };
    info!("Opening feed store at {:?}", location);

    let cache = FeedCache::open(&location)
        .with_context(|| format!("Failed to open feed store at {:?}", location))?;

    let output = commands::run(&cache, args.command).await?;
    println!("{}", output);

    let stats = cache.stats();
    info!(
        "Done: {} retrievals, {} inserts, {} deletes, {} failures",
        stats.retrievals(),
        stats.inserts(),
        stats.deletes(),
        stats.failures()
    );

    // Joining the worker blocks, so keep it off the runtime thread.
    tokio::task::spawn_blocking(move || cache.close())
        .await
        .context("Close task failed")?
        .context("Failed to close feed store")?;
    Ok(())
}
