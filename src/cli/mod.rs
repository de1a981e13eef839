//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "leibniz",
    version,
    about = "Multi-source literature search with cached result fusion",
    long_about = "Leibniz runs vector, citation-graph and keyword retrieval in parallel under a \
                  latency budget, fuses the ranked lists into one deterministic ranking, and \
                  caches fused results across runs."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/leibniz/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search the configured corpus
    Query {
        /// Search query text
        query: String,

        /// Maximum number of results to return
        #[arg(short, long)]
        limit: Option<usize>,

        /// Structured filter, repeatable (e.g. --filter year_min=2022)
        #[arg(short, long = "filter", value_name = "KEY=VALUE", value_parser = parse_filter)]
        filters: Vec<(String, String)>,

        /// Fan-out deadline in milliseconds
        #[arg(short, long)]
        deadline_ms: Option<u64>,

        /// Skip the cache lookup and query every backend
        #[arg(long)]
        no_cache: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,

        /// Profile to apply (e.g. "fast")
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show resolved paths, enabled backends and cache settings
    Info,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("filter key is empty in '{}'", raw));
    }
    Ok((key.to_string(), value.trim().to_string()))
}
