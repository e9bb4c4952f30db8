//! Single sync cycle.

use std::io::Write;

use anyhow::{Context, Result};
use cs_core::CycleReport;

use crate::Config;
use crate::commands::context::SyncContext;

pub fn run<W: Write>(writer: &mut W, config: &Config) -> Result<()> {
    let context = SyncContext::from_config(config)?;
    let runtime = tokio::runtime::Runtime::new().context("failed to initialize tokio runtime")?;
    let report = runtime.block_on(context.run_once())?;
    write_report(writer, &report)
}

pub fn write_report<W: Write>(writer: &mut W, report: &CycleReport) -> Result<()> {
    writeln!(
        writer,
        "Fetched {} events, {} qualifying ({} filtered out, {} invalid)",
        report.fetched, report.qualifying, report.filtered_out, report.invalid
    )?;
    writeln!(
        writer,
        "Created {}, updated {}, recreated {}, deleted {}",
        report.created, report.updated, report.recreated, report.deleted
    )?;
    writeln!(
        writer,
        "Unchanged {}, forgotten {}, skipped (started) {}, failed {}",
        report.unchanged, report.forgotten, report.skipped_started, report.failed
    )?;
    Ok(())
}
