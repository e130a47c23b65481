//! tilestack CLI - Command-line interface
//!
//! This binary provides a command-line interface to the tilestack library:
//! validating run configurations and inspecting written artifacts.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tilestack")]
#[command(version = tilestack::VERSION)]
#[command(about = "Tile/time-window statistical compositing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a run configuration and summarize its task plan
    Plan {
        /// Configuration file (default: ~/.tilestack/config.ini)
        #[arg(long)]
        config: Option<PathBuf>,

        /// List every artifact path of the plan
        #[arg(long)]
        paths: bool,
    },

    /// Read and verify an artifact and print its header
    Inspect {
        /// Artifact file
        artifact: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Plan { config, paths } => commands::plan::run(config, paths),
        Commands::Inspect { artifact } => commands::inspect::run(&artifact),
    };

    if let Err(e) = result {
        e.exit();
    }
}
