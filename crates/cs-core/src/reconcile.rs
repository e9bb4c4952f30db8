//! One sync cycle: fetch, normalize, filter, diff, write, record.
//!
//! Per source id, a cycle resolves to exactly one transition:
//!
//! | ledger entry | signature | target live | transition                       |
//! |--------------|-----------|-------------|----------------------------------|
//! | none         | -         | -           | create (`New`)                   |
//! | present      | equal     | yes         | nothing (`Unchanged`)            |
//! | present      | equal     | no          | recreate (`MissingTarget`)       |
//! | present      | differs   | same shape  | update in place (`Changed`)      |
//! | present      | differs   | other shape | delete, then recreate            |
//! | present      | differs   | no          | recreate                         |
//! | not seen     | -         | yes / no    | delete if live, forget (`Gone`)  |
//!
//! The ledger only changes after the write backing it succeeds, so a failed
//! write is retried by the next cycle.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::client::{EventPayload, SourceClient, SourceError, TargetClient, TimeWindow};
use crate::event::{NormalizedEvent, RawEvent};
use crate::executor::{ExecError, Executor};
use crate::filter::{FilterCriteria, matches};
use crate::kind::{KindRules, KindShape, TargetEventKind};
use crate::ledger::{Ledger, LedgerEntry};
use crate::signature::{Signature, fingerprint};

/// Static inputs to every cycle.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub days_in_future: u32,
    pub timezone: Tz,
    pub kind_rules: KindRules,
    pub criteria: FilterCriteria,
}

/// Counts reported at the end of a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub invalid: usize,
    pub filtered_out: usize,
    pub qualifying: usize,
    pub created: usize,
    pub updated: usize,
    pub recreated: usize,
    pub deleted: usize,
    pub forgotten: usize,
    pub unchanged: usize,
    pub skipped_started: usize,
    pub failed: usize,
}

impl CycleReport {
    /// Successful write transitions.
    pub const fn writes(&self) -> usize {
        self.created + self.updated + self.recreated + self.deleted
    }

    fn record(&mut self, transition: Transition) {
        let counter = match transition {
            Transition::Created => &mut self.created,
            Transition::Updated => &mut self.updated,
            Transition::Recreated => &mut self.recreated,
            Transition::Deleted => &mut self.deleted,
            Transition::Forgotten => &mut self.forgotten,
            Transition::Unchanged => &mut self.unchanged,
            Transition::SkippedStarted => &mut self.skipped_started,
        };
        *counter += 1;
    }
}

/// A cycle that could not run to completion.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to read source events: {0}")]
    Source(#[from] SourceError),
    #[error("failed to list managed target events: {0}")]
    TargetListing(#[source] ExecError),
    #[error("target platform rejected credentials: {0}")]
    Unauthorized(#[source] ExecError),
}

/// The ledger after a cycle, with the cycle's result.
///
/// The ledger is returned even when the cycle aborts: writes that completed
/// before the abort are recorded in it.
#[derive(Debug)]
pub struct CycleOutcome {
    pub ledger: Ledger,
    pub result: Result<CycleReport, CycleError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Created,
    Updated,
    Recreated,
    Deleted,
    Forgotten,
    Unchanged,
    SkippedStarted,
}

/// Drives sync cycles between a source calendar and a target platform.
#[derive(Debug)]
pub struct Reconciler<S, T> {
    source: S,
    target: T,
    executor: Executor,
    options: ReconcileOptions,
}

impl<S, T> Reconciler<S, T>
where
    S: SourceClient,
    T: TargetClient,
{
    pub const fn new(source: S, target: T, executor: Executor, options: ReconcileOptions) -> Self {
        Self {
            source,
            target,
            executor,
            options,
        }
    }

    pub const fn source(&self) -> &S {
        &self.source
    }

    pub const fn target(&self) -> &T {
        &self.target
    }

    pub const fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Runs one cycle against `ledger` as of `now`.
    pub async fn run_cycle(&self, mut ledger: Ledger, now: DateTime<Utc>) -> CycleOutcome {
        let mut report = CycleReport::default();
        let result = match self.reconcile(&mut ledger, now, &mut report).await {
            Ok(()) => {
                tracing::info!(
                    fetched = report.fetched,
                    invalid = report.invalid,
                    filtered_out = report.filtered_out,
                    qualifying = report.qualifying,
                    created = report.created,
                    updated = report.updated,
                    recreated = report.recreated,
                    deleted = report.deleted,
                    forgotten = report.forgotten,
                    unchanged = report.unchanged,
                    skipped_started = report.skipped_started,
                    failed = report.failed,
                    "sync cycle complete"
                );
                Ok(report)
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    created = report.created,
                    updated = report.updated,
                    recreated = report.recreated,
                    deleted = report.deleted,
                    "sync cycle aborted"
                );
                Err(err)
            }
        };
        CycleOutcome { ledger, result }
    }

    async fn reconcile(
        &self,
        ledger: &mut Ledger,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<(), CycleError> {
        let window = TimeWindow::lookahead(now, self.options.days_in_future);
        let raw_events = self.source.list_events(&window).await?;
        report.fetched = raw_events.len();

        let qualifying = self.qualifying_events(&raw_events, report);
        tracing::info!(
            fetched = report.fetched,
            qualifying = qualifying.len(),
            "filtered source events"
        );

        let live: HashMap<String, KindShape> = self
            .executor
            .execute("list_managed_events", || self.target.list_managed_events())
            .await
            .map_err(CycleError::TargetListing)?
            .into_iter()
            .map(|event| (event.id, event.shape))
            .collect();
        tracing::debug!(live = live.len(), tracked = ledger.len(), "loaded target state");

        for event in &qualifying {
            let kind = TargetEventKind::determine(&event.location, &self.options.kind_rules);
            let signature = fingerprint(event, &kind);
            let payload = EventPayload::new(event, kind);
            match self
                .sync_event(ledger, &live, event, &payload, signature, now)
                .await
            {
                Ok(transition) => report.record(transition),
                Err(err) if err.is_unauthorized() => return Err(CycleError::Unauthorized(err)),
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        source_id = %event.id,
                        title = %event.title,
                        error = %err,
                        "write failed, leaving ledger entry for next cycle"
                    );
                }
            }
        }

        let seen: HashSet<&str> = qualifying.iter().map(|event| event.id.as_str()).collect();
        for source_id in ledger.source_ids() {
            if seen.contains(source_id.as_str()) {
                continue;
            }
            match self.retire(ledger, &live, &source_id).await {
                Ok(transition) => report.record(transition),
                Err(err) if err.is_unauthorized() => return Err(CycleError::Unauthorized(err)),
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        source_id = %source_id,
                        error = %err,
                        "delete failed, leaving ledger entry for next cycle"
                    );
                }
            }
        }

        Ok(())
    }

    /// Normalizes and filters raw events, dropping duplicates by id.
    fn qualifying_events(
        &self,
        raw_events: &[RawEvent],
        report: &mut CycleReport,
    ) -> Vec<NormalizedEvent> {
        let mut seen = HashSet::new();
        let mut qualifying = Vec::new();
        for raw in raw_events {
            let event = match NormalizedEvent::normalize(raw, self.options.timezone) {
                Ok(event) => event,
                Err(err) => {
                    report.invalid += 1;
                    tracing::warn!(source_id = %raw.id, error = %err, "skipping invalid event");
                    continue;
                }
            };
            if !matches(&event, &self.options.criteria) {
                report.filtered_out += 1;
                tracing::debug!(source_id = %event.id, title = %event.title, "event filtered out");
                continue;
            }
            if !seen.insert(event.id.clone()) {
                tracing::debug!(source_id = %event.id, "skipping duplicate event");
                continue;
            }
            qualifying.push(event);
        }
        report.qualifying = qualifying.len();
        qualifying
    }

    async fn sync_event(
        &self,
        ledger: &mut Ledger,
        live: &HashMap<String, KindShape>,
        event: &NormalizedEvent,
        payload: &EventPayload,
        signature: Signature,
        now: DateTime<Utc>,
    ) -> Result<Transition, ExecError> {
        let started = event.start <= now;

        let Some(entry) = ledger.get(&event.id).cloned() else {
            if started {
                return Ok(skip_started(event));
            }
            let target_id = self.create(payload).await?;
            tracing::info!(source_id = %event.id, %target_id, title = %event.title, "created target event");
            ledger.insert(event.id.clone(), entry_for(target_id, signature, now));
            return Ok(Transition::Created);
        };

        let live_shape = live.get(&entry.target_id).copied();

        if entry.signature == signature {
            if live_shape.is_some() {
                if let Some(entry) = ledger.get_mut(&event.id) {
                    entry.last_seen_at = now;
                }
                tracing::debug!(source_id = %event.id, "target event unchanged");
                return Ok(Transition::Unchanged);
            }
            if started {
                return Ok(skip_started(event));
            }
            let target_id = self.create(payload).await?;
            tracing::info!(
                source_id = %event.id,
                missing_target_id = %entry.target_id,
                %target_id,
                "recreated missing target event"
            );
            ledger.insert(event.id.clone(), entry_for(target_id, signature, now));
            return Ok(Transition::Recreated);
        }

        match live_shape {
            Some(shape) if shape == payload.kind.shape() => {
                self.update(&entry.target_id, payload).await?;
                tracing::info!(source_id = %event.id, target_id = %entry.target_id, "updated target event");
                ledger.insert(event.id.clone(), entry_for(entry.target_id, signature, now));
                Ok(Transition::Updated)
            }
            Some(shape) => {
                if started {
                    return Ok(skip_started(event));
                }
                // Shapes cannot be converted in place; the old event must be gone
                // before its replacement exists.
                self.delete(&entry.target_id).await?;
                let target_id = self.create(payload).await?;
                tracing::info!(
                    source_id = %event.id,
                    old_target_id = %entry.target_id,
                    %target_id,
                    from = %shape,
                    to = %payload.kind.shape(),
                    "replaced target event after kind change"
                );
                ledger.insert(event.id.clone(), entry_for(target_id, signature, now));
                Ok(Transition::Recreated)
            }
            None => {
                if started {
                    return Ok(skip_started(event));
                }
                let target_id = self.create(payload).await?;
                tracing::info!(
                    source_id = %event.id,
                    missing_target_id = %entry.target_id,
                    %target_id,
                    "recreated changed target event"
                );
                ledger.insert(event.id.clone(), entry_for(target_id, signature, now));
                Ok(Transition::Recreated)
            }
        }
    }

    /// Handles a tracked source id that no longer qualifies.
    async fn retire(
        &self,
        ledger: &mut Ledger,
        live: &HashMap<String, KindShape>,
        source_id: &str,
    ) -> Result<Transition, ExecError> {
        let Some(target_id) = ledger.get(source_id).map(|entry| entry.target_id.clone()) else {
            return Ok(Transition::Forgotten);
        };
        if !live.contains_key(&target_id) {
            ledger.remove(source_id);
            tracing::debug!(source_id, %target_id, "forgot entry without live target");
            return Ok(Transition::Forgotten);
        }
        self.delete(&target_id).await?;
        ledger.remove(source_id);
        tracing::info!(source_id, %target_id, "deleted target event");
        Ok(Transition::Deleted)
    }

    async fn create(&self, payload: &EventPayload) -> Result<String, ExecError> {
        self.executor
            .execute("create_event", || self.target.create_event(payload))
            .await
    }

    async fn update(&self, target_id: &str, payload: &EventPayload) -> Result<(), ExecError> {
        self.executor
            .execute("update_event", || self.target.update_event(target_id, payload))
            .await
    }

    async fn delete(&self, target_id: &str) -> Result<(), ExecError> {
        self.executor
            .execute("delete_event", || self.target.delete_event(target_id))
            .await
    }
}

fn entry_for(target_id: String, signature: Signature, now: DateTime<Utc>) -> LedgerEntry {
    LedgerEntry {
        target_id,
        signature,
        last_seen_at: now,
    }
}

fn skip_started(event: &NormalizedEvent) -> Transition {
    tracing::debug!(source_id = %event.id, start = %event.start, "event already started, not creating");
    Transition::SkippedStarted
}
