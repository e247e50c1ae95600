//! Command-line interface definition.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "shiftcast", about = "Time-shifting radio relay", version)]
pub struct Cli {
    /// Path to the YAML config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record configured streams and serve the time-shifted endpoints.
    Start {
        /// Override the listen address from the config file.
        #[arg(long)]
        listen: Option<String>,
    },
    /// Validate a config file and exit.
    Validate,
    /// Print the version.
    Version,
}
