//! Configuration validation.

use std::io::Write;

use anyhow::{Context, Result};

use crate::Config;
use crate::commands::context::build_clients;

pub fn run<W: Write>(writer: &mut W, config: &Config) -> Result<()> {
    let criteria = config
        .filter_criteria()
        .context("invalid filter configuration")?;
    build_clients(config)?;

    let timezone = match cs_core::parse_timezone(&config.timezone) {
        Ok(tz) => tz.name().to_string(),
        Err(err) => format!("UTC ({err}, falling back)"),
    };
    let channel = config.discord.channel_id.trim();
    let channel = if channel.is_empty() { "not set" } else { channel };

    writeln!(writer, "Configuration OK")?;
    writeln!(writer, "Ledger: {}", config.ledger_path.display())?;
    writeln!(writer, "Calendar: {}", config.google.calendar_id.trim())?;
    writeln!(writer, "Guild: {}", config.discord.guild_id.trim())?;
    writeln!(
        writer,
        "Voice channel: {channel} (marker \"{}\")",
        config.discord.voice_marker
    )?;
    writeln!(writer, "Timezone: {timezone}")?;
    writeln!(
        writer,
        "Window: {} days, every {}s",
        config.days_in_future,
        config.sync_interval().as_secs()
    )?;
    writeln!(
        writer,
        "Filters: {} inclusion, {} exclusion",
        criteria.inclusion_count(),
        criteria.exclusion_count()
    )?;
    Ok(())
}
