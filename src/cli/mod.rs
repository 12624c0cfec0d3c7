//! CLI module for the Groundplan tool.
//!
//! This module provides the command-line interface for planning and
//! applying manifests.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
