//! CLI interface
//!
//! This module provides the command-line interface using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Checkin accountability engine
///
/// A single-user accountability assistant that asks a short set of
/// questions every evening, turns the free-text answer into a
/// structured summary, carries an open goal into the next day, and
/// rolls the week up into a recap every Sunday.
#[derive(Parser, Debug)]
#[command(name = "checkin")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the engine: scheduler, Telegram listener, and orchestrator
    Start,

    /// Show the configured schedule and the computed next fire times
    Status,
}
