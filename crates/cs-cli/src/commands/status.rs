//! Status command for showing the events tracked in the ledger.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use cs_ledger::LedgerStore;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, config: &Config, json: bool) -> Result<()> {
    let store = LedgerStore::new(&config.ledger_path);
    let ledger = store
        .load()
        .with_context(|| format!("failed to read {}", config.ledger_path.display()))?;

    if json {
        let output = serde_json::json!({
            "ledger_path": config.ledger_path,
            "entries": ledger,
        });
        writeln!(writer, "{}", serde_json::to_string_pretty(&output)?)?;
        return Ok(());
    }

    writeln!(writer, "calsync status")?;
    writeln!(writer, "Ledger: {}", config.ledger_path.display())?;

    if ledger.is_empty() {
        writeln!(writer, "No events tracked.")?;
        return Ok(());
    }

    writeln!(writer, "Tracked events: {}", ledger.len())?;
    for (source_id, entry) in ledger.iter() {
        let last_seen = entry.last_seen_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        if entry.signature.is_unknown() {
            writeln!(
                writer,
                "- {source_id} -> {} (last seen {last_seen}, signature unknown)",
                entry.target_id
            )?;
        } else {
            writeln!(writer, "- {source_id} -> {} (last seen {last_seen})", entry.target_id)?;
        }
    }

    Ok(())
}
