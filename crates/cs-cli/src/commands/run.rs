//! Long-running scheduler mode.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::Config;
use crate::commands::context::SyncContext;
use crate::scheduler;

pub fn run(config: &Config) -> Result<()> {
    let context = SyncContext::from_config(config)?;
    let interval = config.sync_interval();
    let runtime = tokio::runtime::Runtime::new().context("failed to initialize tokio runtime")?;

    runtime.block_on(async {
        let token = CancellationToken::new();
        tokio::spawn(scheduler::cancel_on_shutdown(token.clone()));

        tracing::info!(
            interval_secs = interval.as_secs(),
            ledger = %config.ledger_path.display(),
            "starting scheduler"
        );
        let context = &context;
        scheduler::run_every(interval, &token, move || async move {
            if let Err(err) = context.run_once().await {
                tracing::error!(error = %format!("{err:#}"), "sync cycle failed");
            }
        })
        .await;
    });
    Ok(())
}
