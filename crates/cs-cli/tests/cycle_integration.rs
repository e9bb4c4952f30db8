//! Multi-cycle tests driving the reconciler against in-memory clients and a
//! real ledger file.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cs_cli::commands::context::SyncContext;
use cs_core::{
    EventPayload, EventTime, Executor, FilterCriteria, KindRules, KindShape, ManagedEvent,
    PredicateKind, RawEvent, ReconcileOptions, Reconciler, RetryPolicy, SourceClient, SourceError,
    TargetClient, TimeWindow, WriteError,
};
use cs_ledger::LedgerStore;
use tempfile::TempDir;

#[derive(Default)]
struct Calendar {
    events: Mutex<Vec<RawEvent>>,
}

impl SourceClient for Calendar {
    async fn list_events(&self, _window: &TimeWindow) -> Result<Vec<RawEvent>, SourceError> {
        Ok(self.events.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct GuildState {
    next_id: usize,
    events: BTreeMap<String, EventPayload>,
    creates: usize,
    unauthorized_on_create: Option<usize>,
}

#[derive(Default)]
struct Guild {
    state: Mutex<GuildState>,
}

impl Guild {
    fn seed(&self, target_id: &str, payload: EventPayload) {
        self.state
            .lock()
            .unwrap()
            .events
            .insert(target_id.to_string(), payload);
    }

    fn len(&self) -> usize {
        self.state.lock().unwrap().events.len()
    }

    fn titles(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .events
            .values()
            .map(|payload| payload.title.clone())
            .collect()
    }
}

impl TargetClient for Guild {
    async fn list_managed_events(&self) -> Result<Vec<ManagedEvent>, WriteError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .events
            .iter()
            .map(|(id, payload)| ManagedEvent {
                id: id.clone(),
                shape: payload.kind.shape(),
            })
            .collect())
    }

    async fn create_event(&self, payload: &EventPayload) -> Result<String, WriteError> {
        let mut state = self.state.lock().unwrap();
        state.creates += 1;
        if state.unauthorized_on_create == Some(state.creates) {
            return Err(WriteError::Unauthorized("401: Unauthorized".to_string()));
        }
        state.next_id += 1;
        let id = format!("d{}", state.next_id);
        state.events.insert(id.clone(), payload.clone());
        Ok(id)
    }

    async fn update_event(&self, target_id: &str, payload: &EventPayload) -> Result<(), WriteError> {
        let mut state = self.state.lock().unwrap();
        match state.events.get_mut(target_id) {
            Some(existing) => {
                *existing = payload.clone();
                Ok(())
            }
            None => Err(WriteError::Fatal {
                status: 404,
                message: "Unknown Guild Scheduled Event".to_string(),
            }),
        }
    }

    async fn delete_event(&self, target_id: &str) -> Result<(), WriteError> {
        self.state.lock().unwrap().events.remove(target_id);
        Ok(())
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn event(id: &str, title: &str, location: &str, day: u32) -> RawEvent {
    let start = Utc.with_ymd_and_hms(2026, 3, day, 18, 0, 0).unwrap();
    RawEvent {
        id: id.to_string(),
        title: title.to_string(),
        description: String::new(),
        location: location.to_string(),
        start: EventTime::DateTime(start.fixed_offset()),
        end: EventTime::DateTime((start + chrono::TimeDelta::hours(2)).fixed_offset()),
        creator_email: None,
        attendee_emails: Vec::new(),
    }
}

fn context(temp: &TempDir, criteria: FilterCriteria) -> SyncContext<Calendar, Guild> {
    let policy = RetryPolicy {
        initial_backoff: Duration::ZERO,
        rate_limit_buffer: Duration::ZERO,
        write_spacing: Duration::ZERO,
        ..RetryPolicy::default()
    };
    let options = ReconcileOptions {
        days_in_future: 30,
        timezone: Tz::UTC,
        kind_rules: KindRules::new("discord", "voice-1"),
        criteria,
    };
    SyncContext::new(
        Reconciler::new(
            Calendar::default(),
            Guild::default(),
            Executor::new(policy),
            options,
        ),
        LedgerStore::new(temp.path().join("ledger.json")),
    )
}

fn set_events(context: &SyncContext<Calendar, Guild>, events: Vec<RawEvent>) {
    *context.reconciler().source().events.lock().unwrap() = events;
}

#[tokio::test]
async fn ledger_survives_between_cycles() {
    let temp = tempfile::tempdir().unwrap();
    let ctx = context(&temp, FilterCriteria::allow_all());
    set_events(
        &ctx,
        vec![
            event("g1", "Raid night", "Discord voice", 3),
            event("g2", "Picnic", "Central Park", 4),
        ],
    );

    let report = ctx.run_once_at(now()).await.unwrap();
    assert_eq!(report.created, 2);
    assert_eq!(ctx.store().load().unwrap().len(), 2);

    let report = ctx.run_once_at(now()).await.unwrap();
    assert_eq!(report.unchanged, 2);
    assert_eq!(report.writes(), 0);
    assert_eq!(ctx.reconciler().target().len(), 2);
}

#[tokio::test]
async fn edited_and_removed_events_propagate() {
    let temp = tempfile::tempdir().unwrap();
    let ctx = context(&temp, FilterCriteria::allow_all());
    set_events(
        &ctx,
        vec![
            event("g1", "Raid night", "discord", 3),
            event("g2", "Picnic", "Central Park", 4),
        ],
    );
    ctx.run_once_at(now()).await.unwrap();

    set_events(&ctx, vec![event("g1", "Raid night (moved)", "discord", 5)]);
    let report = ctx.run_once_at(now()).await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.deleted, 1);
    assert_eq!(ctx.reconciler().target().titles(), vec!["Raid night (moved)".to_string()]);

    let ledger = ctx.store().load().unwrap();
    assert!(ledger.contains("g1"));
    assert!(!ledger.contains("g2"));
}

#[tokio::test]
async fn filters_limit_what_is_mirrored() {
    let temp = tempfile::tempdir().unwrap();
    let criteria = FilterCriteria::allow_all()
        .include(PredicateKind::TitleContains, "raid")
        .exclude(PredicateKind::TitleContains, "cancelled");
    let ctx = context(&temp, criteria);
    set_events(
        &ctx,
        vec![
            event("g1", "Raid night", "discord", 3),
            event("g2", "Picnic", "Central Park", 4),
            event("g3", "Raid (cancelled)", "discord", 5),
        ],
    );

    let report = ctx.run_once_at(now()).await.unwrap();
    assert_eq!(report.qualifying, 1);
    assert_eq!(report.filtered_out, 2);
    assert_eq!(ctx.reconciler().target().titles(), vec!["Raid night".to_string()]);
}

#[tokio::test]
async fn corrupt_ledger_is_moved_aside_and_rebuilt() {
    let temp = tempfile::tempdir().unwrap();
    let ctx = context(&temp, FilterCriteria::allow_all());
    set_events(&ctx, vec![event("g1", "Raid night", "discord", 3)]);
    ctx.run_once_at(now()).await.unwrap();

    std::fs::write(ctx.store().path(), "{ truncated").unwrap();
    let report = ctx.run_once_at(now()).await.unwrap();

    assert_eq!(report.created, 1);
    assert!(temp.path().join("ledger.json.corrupt").exists());
    assert_eq!(ctx.store().load().unwrap().len(), 1);
    // The copy created before the corruption is no longer tracked.
    assert_eq!(ctx.reconciler().target().len(), 2);
}

#[tokio::test]
async fn newer_ledger_fails_cycle_without_overwriting() {
    let temp = tempfile::tempdir().unwrap();
    let ctx = context(&temp, FilterCriteria::allow_all());
    let newer = r#"{"version": 2, "entries": {"g1": {"target_id": "d9", "signature": "ff", "last_seen_at": "2026-01-01T00:00:00Z"}}}"#;
    std::fs::write(ctx.store().path(), newer).unwrap();
    set_events(&ctx, vec![event("g1", "Raid night", "discord", 3)]);

    let err = ctx.run_once_at(now()).await.unwrap_err();
    assert!(format!("{err:#}").contains("unsupported version 2"));
    assert_eq!(std::fs::read_to_string(ctx.store().path()).unwrap(), newer);
    assert_eq!(ctx.reconciler().target().len(), 0);
}

#[tokio::test]
async fn aborted_cycle_still_saves_completed_writes() {
    let temp = tempfile::tempdir().unwrap();
    let ctx = context(&temp, FilterCriteria::allow_all());
    ctx.reconciler()
        .target()
        .state
        .lock()
        .unwrap()
        .unauthorized_on_create = Some(2);
    set_events(
        &ctx,
        vec![
            event("g1", "Raid night", "discord", 3),
            event("g2", "Picnic", "Central Park", 4),
        ],
    );

    let err = ctx.run_once_at(now()).await.unwrap_err();
    assert!(format!("{err:#}").contains("rejected credentials"));
    assert_eq!(ctx.store().load().unwrap().len(), 1);

    ctx.reconciler().target().state.lock().unwrap().unauthorized_on_create = None;
    let report = ctx.run_once_at(now()).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.unchanged, 1);
}

#[tokio::test]
async fn legacy_ledger_entries_are_updated_in_place() {
    let temp = tempfile::tempdir().unwrap();
    let ctx = context(&temp, FilterCriteria::allow_all());
    std::fs::write(
        ctx.store().path(),
        r#"{"events": [{"google_event_id": "g1", "discord_event_id": "legacy-1"}]}"#,
    )
    .unwrap();
    let stale = event("g1", "Old title", "discord", 3);
    ctx.reconciler().target().seed(
        "legacy-1",
        EventPayload {
            title: stale.title.clone(),
            description: String::new(),
            start: now(),
            end: now(),
            kind: cs_core::TargetEventKind::VoiceLinked {
                channel_id: "voice-1".to_string(),
            },
        },
    );
    set_events(&ctx, vec![event("g1", "Raid night", "discord", 3)]);

    let report = ctx.run_once_at(now()).await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.created, 0);
    assert_eq!(ctx.reconciler().target().titles(), vec!["Raid night".to_string()]);

    let ledger = ctx.store().load().unwrap();
    let entry = ledger.get("g1").unwrap();
    assert_eq!(entry.target_id, "legacy-1");
    assert!(!entry.signature.is_unknown());

    let report = ctx.run_once_at(now()).await.unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(
        ctx.reconciler()
            .target()
            .list_managed_events()
            .await
            .unwrap()[0]
            .shape,
        KindShape::Voice
    );
}
