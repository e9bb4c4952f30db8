//! Durable storage for the sync ledger.
//!
//! The ledger is persisted as a single JSON document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "entries": {
//!     "<source event id>": {
//!       "target_id": "...",
//!       "signature": "<sha-256 hex>",
//!       "last_seen_at": "2026-01-01T00:00:00Z"
//!     }
//!   }
//! }
//! ```
//!
//! # Atomicity
//!
//! Saves write a temporary file in the ledger's directory and rename it over
//! the previous document, so a crash mid-write leaves the old ledger intact.
//!
//! # Legacy documents
//!
//! Documents of the shape `{"events": [{"google_event_id", "discord_event_id", ...}]}`
//! are imported with an unknown signature. The next cycle then treats each
//! entry as changed and updates its target event in place.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use cs_core::{Ledger, LedgerEntry, Signature};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

const FORMAT_VERSION: u32 = 1;
const CORRUPT_SUFFIX: &str = "corrupt";

/// Ledger storage errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Reading or writing the ledger file failed.
    #[error("ledger I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The ledger file exists but is not a ledger document.
    #[error("ledger file {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },
    /// The ledger was written by a newer version.
    #[error("ledger file {path} has unsupported version {version}")]
    UnsupportedVersion { path: PathBuf, version: u32 },
    /// Encoding the ledger failed.
    #[error("failed to encode ledger: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerDocument {
    version: u32,
    entries: Ledger,
}

#[derive(Debug, Deserialize)]
struct LegacyDocument {
    events: Vec<LegacyEntry>,
}

#[derive(Debug, Deserialize)]
struct LegacyEntry {
    google_event_id: String,
    discord_event_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnyDocument {
    Current(LedgerDocument),
    Legacy(LegacyDocument),
}

/// File-backed ledger store.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the ledger. A missing file is an empty ledger.
    pub fn load(&self) -> Result<Ledger, LedgerError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Ledger::new()),
            Err(source) => {
                return Err(LedgerError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let document: AnyDocument =
            serde_json::from_str(&contents).map_err(|err| LedgerError::Corrupt {
                path: self.path.clone(),
                message: err.to_string(),
            })?;

        match document {
            AnyDocument::Current(document) if document.version > FORMAT_VERSION => {
                Err(LedgerError::UnsupportedVersion {
                    path: self.path.clone(),
                    version: document.version,
                })
            }
            AnyDocument::Current(document) => Ok(document.entries),
            AnyDocument::Legacy(legacy) => {
                tracing::info!(
                    path = ?self.path,
                    entries = legacy.events.len(),
                    "importing legacy ledger"
                );
                Ok(import_legacy(legacy, Utc::now()))
            }
        }
    }

    /// Loads the ledger, recovering from a corrupt file.
    ///
    /// A corrupt file is moved aside to `<path>.corrupt` and an empty ledger
    /// is returned. Events that already exist on the target are recreated by
    /// the next cycle and the stale copies are left for manual cleanup.
    ///
    /// Any other failure (a newer format, an unreadable file, or a corrupt
    /// file that cannot be moved) is returned, and the caller must not save
    /// over the file.
    pub fn load_or_recover(&self) -> Result<Ledger, LedgerError> {
        match self.load() {
            Err(LedgerError::Corrupt { message, .. }) => {
                let aside = self.corrupt_path();
                fs::rename(&self.path, &aside).map_err(|source| LedgerError::Io {
                    path: aside.clone(),
                    source,
                })?;
                tracing::warn!(
                    error = %message,
                    path = ?aside,
                    "moved corrupt ledger aside, starting from an empty ledger"
                );
                Ok(Ledger::new())
            }
            other => other,
        }
    }

    /// Atomically replaces the stored ledger.
    pub fn save(&self, ledger: &Ledger) -> Result<(), LedgerError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|source| LedgerError::Io {
            path: dir.clone(),
            source,
        })?;

        let document = LedgerDocument {
            version: FORMAT_VERSION,
            entries: ledger.clone(),
        };
        let json = serde_json::to_string_pretty(&document)?;

        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        let mut temp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        temp.write_all(json.as_bytes()).map_err(io_err)?;
        temp.as_file().sync_all().map_err(io_err)?;
        temp.persist(&self.path).map_err(|err| io_err(err.error))?;

        tracing::debug!(path = ?self.path, entries = ledger.len(), "saved ledger");
        Ok(())
    }

    fn corrupt_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(CORRUPT_SUFFIX);
        self.path.with_file_name(name)
    }
}

fn import_legacy(legacy: LegacyDocument, now: DateTime<Utc>) -> Ledger {
    legacy
        .events
        .into_iter()
        .filter(|entry| !entry.google_event_id.is_empty() && !entry.discord_event_id.is_empty())
        .map(|entry| {
            (
                entry.google_event_id,
                LedgerEntry {
                    target_id: entry.discord_event_id,
                    signature: Signature::default(),
                    last_seen_at: now,
                },
            )
        })
        .collect()
}
