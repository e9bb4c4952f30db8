//! The sync ledger: which target event mirrors which source event.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signature::Signature;

/// What the engine last wrote for one source event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub target_id: String,
    pub signature: Signature,
    pub last_seen_at: DateTime<Utc>,
}

/// Mapping from source event id to its [`LedgerEntry`].
///
/// The ledger is a plain value: a sync cycle takes it by value and hands back
/// the updated copy, and persistence lives in a separate crate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    entries: BTreeMap<String, LedgerEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source_id: &str) -> Option<&LedgerEntry> {
        self.entries.get(source_id)
    }

    pub fn get_mut(&mut self, source_id: &str) -> Option<&mut LedgerEntry> {
        self.entries.get_mut(source_id)
    }

    pub fn insert(&mut self, source_id: impl Into<String>, entry: LedgerEntry) {
        self.entries.insert(source_id.into(), entry);
    }

    pub fn remove(&mut self, source_id: &str) -> Option<LedgerEntry> {
        self.entries.remove(source_id)
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.entries.contains_key(source_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by source id.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LedgerEntry)> {
        self.entries.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    /// Source ids currently tracked.
    pub fn source_ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

impl FromIterator<(String, LedgerEntry)> for Ledger {
    fn from_iter<I: IntoIterator<Item = (String, LedgerEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
