//! Calendar to Discord sync CLI library.
//!
//! This crate provides the `calsync` command-line interface and the wiring
//! between configuration, the ledger store and the remote clients.

mod cli;
pub mod commands;
mod config;
pub mod scheduler;

pub use cli::{Cli, Commands};
pub use config::{Config, DiscordConfig, GoogleConfig, RetryConfig};
