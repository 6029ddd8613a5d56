use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use common::{
    storage::types::metadata::{Metadata, MetadataFilter},
    utils::embedding::EmbeddingBackend,
};

#[derive(Debug, Parser)]
#[command(name = "rag", about = "Ingest documents and answer questions over them")]
pub struct Cli {
    /// Overrides the configured embedding backend (openai, fastembed, hashed)
    #[arg(long, global = true)]
    pub embedding_backend: Option<EmbeddingBackend>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Split, embed and store files
    Insert {
        /// Files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Metadata attached to every chunk, as key=value
        #[arg(long = "meta", value_parser = parse_pair)]
        metadata: Vec<(String, String)>,
    },
    /// Ask a single question using the active filter
    Query {
        question: String,

        #[arg(long, default_value = "default")]
        session: String,
    },
    /// Interactive conversation on stdin using the active filter; `/reset`
    /// forgets the history, `/exit` quits
    Chat {
        #[arg(long, default_value = "default")]
        session: String,
    },
    /// Delete every processed file admitted by the active filter
    Delete,
    /// List processed files
    Ledger,
    /// Inspect or change the active metadata filter
    Filter {
        #[command(subcommand)]
        action: FilterAction,
    },
    /// Drop the ledger and every stored chunk
    Reset {
        /// Required to confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum FilterAction {
    /// Print the active filter and the values available per key
    Show,
    /// Replace the active filter; repeat `--allow key=value` to whitelist values
    Set {
        #[arg(long = "allow", value_parser = parse_pair)]
        allowed: Vec<(String, String)>,
    },
    /// Remove whitelisted values that no processed file carries anymore
    Prune,
    /// Remove every constraint
    Clear,
}

fn parse_pair(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

pub fn metadata_from_pairs(pairs: Vec<(String, String)>) -> Metadata {
    pairs
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect()
}

pub fn filter_from_pairs(pairs: Vec<(String, String)>) -> MetadataFilter {
    let mut filter = MetadataFilter::new();
    for (key, value) in pairs {
        filter
            .0
            .entry(key)
            .or_default()
            .allowed
            .push(Value::String(value));
    }
    filter.normalized()
}
