//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::commands::{config::ConfigArgs, lease::LeaseArgs, replay::ReplayArgs};

#[derive(Parser, Debug)]
#[command(name = "capture-fusion")]
#[command(about = "Capture fusion - lifecycle signal fusion and canonical stabilization", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .capture-fusion/config.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay a JSON Lines file of fusion messages through a fresh engine
    Replay(ReplayArgs),

    /// Inspect or operate probe leases in the shared store
    Lease(LeaseArgs),

    /// Configuration commands
    Config(ConfigArgs),
}
