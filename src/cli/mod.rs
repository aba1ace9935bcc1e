//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "rankmix",
    version,
    about = "Administration for the rankmix hybrid retrieval engine",
    long_about = "Inspect and initialise rankmix configuration and maintain its result cache. \
                  Retrieval itself is a library call made by the embedding application."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/rankmix/config.toml)
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
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Inspect and maintain the result cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section (e.g., "scoring")
        #[arg(short, long)]
        section: Option<String>,
    },

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

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show entry counts and size of the SQLite cache
    Stats,

    /// Remove expired entries (or everything with --all)
    Purge {
        /// Remove live entries too
        #[arg(long)]
        all: bool,
    },

    /// Print the cache keys a query maps to
    Key {
        /// Query text
        query: String,

        /// Result size (defaults to reranker.top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Also print the rerank key for this document id
        #[arg(long)]
        doc_id: Option<String>,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
