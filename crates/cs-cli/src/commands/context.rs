//! Wiring shared by the commands that run sync cycles.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cs_core::{CycleOutcome, CycleReport, Executor, Reconciler, SourceClient, TargetClient};
use cs_ledger::LedgerStore;
use cs_remote::{DiscordClient, GoogleCalendarClient};

use crate::Config;

/// A reconciler paired with the store its ledger lives in.
#[derive(Debug)]
pub struct SyncContext<S, T> {
    reconciler: Reconciler<S, T>,
    store: LedgerStore,
}

impl SyncContext<GoogleCalendarClient, DiscordClient> {
    /// Builds the live clients from configuration. No request is sent.
    pub fn from_config(config: &Config) -> Result<Self> {
        let options = config
            .reconcile_options()
            .context("invalid filter configuration")?;
        let (source, target) = build_clients(config)?;
        let executor = Executor::new(config.retry.policy());
        Ok(Self::new(
            Reconciler::new(source, target, executor, options),
            LedgerStore::new(&config.ledger_path),
        ))
    }
}

impl<S, T> SyncContext<S, T>
where
    S: SourceClient,
    T: TargetClient,
{
    pub const fn new(reconciler: Reconciler<S, T>, store: LedgerStore) -> Self {
        Self { reconciler, store }
    }

    pub const fn reconciler(&self) -> &Reconciler<S, T> {
        &self.reconciler
    }

    pub const fn store(&self) -> &LedgerStore {
        &self.store
    }

    /// Runs one cycle now.
    pub async fn run_once(&self) -> Result<CycleReport> {
        self.run_once_at(Utc::now()).await
    }

    /// Loads the ledger, runs one cycle as of `now`, and saves the ledger.
    ///
    /// The ledger is saved even when the cycle aborts, so writes completed
    /// before the abort are not repeated. A ledger that cannot be loaded
    /// (other than a corrupt one) fails the cycle before any write.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let ledger = self
            .store
            .load_or_recover()
            .with_context(|| format!("failed to load {}", self.store.path().display()))?;
        let CycleOutcome { ledger, result } = self.reconciler.run_cycle(ledger, now).await;
        self.store
            .save(&ledger)
            .with_context(|| format!("failed to save {}", self.store.path().display()))?;
        result.context("sync cycle failed")
    }
}

/// Creates the calendar and Discord clients described by `config`.
pub fn build_clients(config: &Config) -> Result<(GoogleCalendarClient, DiscordClient)> {
    let auth = config
        .google_auth()
        .context("failed to load Google credentials")?
        .ok_or_else(|| {
            anyhow::anyhow!(
                "missing Google credentials (set google.credentials_file, google.api_key \
                 or google.access_token)"
            )
        })?;
    let source = GoogleCalendarClient::new(&config.google.calendar_id, auth)
        .context("failed to create calendar client")?
        .with_query(config.google.query.clone());

    let token = config.discord.bot_token.as_deref().unwrap_or_default();
    let target = DiscordClient::new(token, &config.discord.guild_id)
        .context("failed to create Discord client")?;
    Ok((source, target))
}
