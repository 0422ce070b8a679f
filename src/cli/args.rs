//! CLI argument definitions using clap.
//!
//! Commands:
//! - `loom-server serve --config <path>`
//! - `loom-server init --config <path>`

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Loom - orchestration control plane for human-supervised migrations.
#[derive(Parser, Debug)]
#[command(name = "loom-server")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the Loom server.
    Serve {
        /// Path to configuration file.
        #[arg(long, default_value = "./loom.toml")]
        config: PathBuf,
    },

    /// Write a starter configuration file and exit.
    Init {
        /// Path to write the configuration file to.
        #[arg(long, default_value = "./loom.toml")]
        config: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
