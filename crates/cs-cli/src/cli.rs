//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Mirrors a Google Calendar into Discord guild scheduled events.
///
/// Each sync cycle reads upcoming calendar events, keeps the ones matching
/// the configured filters, and creates, updates or deletes the scheduled
/// events this bot owns so the guild matches the calendar.
#[derive(Debug, Parser)]
#[command(name = "calsync", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run sync cycles on a fixed interval until interrupted.
    Run,

    /// Run exactly one sync cycle.
    Sync,

    /// Show the events tracked in the ledger.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration without contacting any API.
    Check,
}
