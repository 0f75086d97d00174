use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "unfurl", version, about = "Reveal structured model output field by field as it streams")]
pub struct Cli {
    /// Log engine internals to stderr (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Follow the live stream of a generation job
    Stream {
        job_id: String,
        /// Field registry (YAML)
        #[arg(long)]
        registry: Option<PathBuf>,
        /// Config file (defaults to the user config directory)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print snapshots as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Run a recorded frame log through the engine
    Replay {
        frames: PathBuf,
        #[arg(long)]
        registry: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
        /// Delay between recorded lines, in milliseconds
        #[arg(long, default_value_t = 0)]
        pace_ms: u64,
    },

    /// Repair malformed JSON from a file or stdin
    Repair {
        file: Option<PathBuf>,
        /// Indentation width; 0 prints compact JSON
        #[arg(long, default_value_t = 2)]
        indent: usize,
        /// Escape non-ASCII characters
        #[arg(long)]
        ensure_ascii: bool,
    },

    /// Validate a field registry
    CheckRegistry {
        file: PathBuf,
        /// Render kinds the consumer can draw
        #[arg(long = "known", value_name = "KIND")]
        known: Vec<String>,
    },
}
