//! Reconciliation engine for syncing calendar entries to scheduled events.
//!
//! This crate contains the fundamental types and logic for:
//! - Normalization: turning raw calendar records into [`NormalizedEvent`]s
//! - Filtering: include/exclude predicates over normalized events
//! - Change detection: content [`Signature`]s compared against the [`Ledger`]
//! - Reconciliation: one sync cycle of create/update/delete/recovery writes
//! - Retry: the rate-limit aware [`Executor`] wrapped around every remote call

pub mod client;
pub mod event;
pub mod executor;
pub mod filter;
pub mod html;
pub mod kind;
pub mod ledger;
pub mod reconcile;
pub mod signature;
pub mod timezone;

pub use client::{
    EventPayload, ManagedEvent, SourceClient, SourceError, TargetClient, TimeWindow, WriteError,
};
pub use event::{EventTime, NormalizeError, NormalizedEvent, RawEvent};
pub use executor::{ExecError, Executor, RetryPolicy};
pub use filter::{FilterConfigError, FilterCriteria, PredicateKind, matches};
pub use kind::{KindRules, KindShape, TargetEventKind};
pub use ledger::{Ledger, LedgerEntry};
pub use reconcile::{CycleError, CycleOutcome, CycleReport, ReconcileOptions, Reconciler};
pub use signature::{Signature, fingerprint};
pub use timezone::{TimezoneConfigError, all_day_bounds, parse_timezone, resolve_timezone};
