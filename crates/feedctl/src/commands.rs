//! Subcommands for feedctl

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use feedcache::{FeedCache, Item};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the cached feed as JSON (`null` when empty)
    Retrieve,

    /// Replace the cached feed with the items in a JSON file
    Insert {
        /// JSON array of items
        #[arg(short, long)]
        file: PathBuf,

        /// Cache timestamp (RFC 3339), defaults to now
        #[arg(short, long)]
        timestamp: Option<DateTime<Utc>>,
    },

    /// Empty the cache
    Delete,
}

pub async fn run(cache: &FeedCache, command: Command) -> Result<String> {
    match command {
        Command::Retrieve => {
            let record = cache
                .retrieve_async()
                .await
                .context("Failed to retrieve cached feed")?
                .into_record();
            Ok(serde_json::to_string_pretty(&record)?)
        }
        Command::Insert { file, timestamp } => {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            let items: Vec<Item> = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid item list in {:?}", file))?;
            let count = items.len();

            cache
                .insert_async(items, timestamp.unwrap_or_else(Utc::now))
                .await
                .context("Failed to insert feed")?;
            Ok(format!("OK ({} items)", count))
        }
        Command::Delete => {
            cache.delete_async().await.context("Failed to delete cached feed")?;
            Ok("OK".to_string())
        }
    }
}
