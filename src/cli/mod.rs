//! # CLI
//!
//! `clap`-derived argument parsing for the `loom-server` binary.

pub mod args;

pub use args::{Cli, Command};
