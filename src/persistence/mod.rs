//! Session persistence: one JSON file per session.
//!
//! Saves are atomic (write to a sibling temp file, then rename) so a crash
//! mid-write never corrupts an existing record. Loads are best-effort: an
//! unreadable file is renamed aside with a `.corrupt` suffix and the session
//! simply starts empty.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::dialog::Turn;

/// Persisted shape of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turns: Vec<Turn>,
}

impl SessionRecord {
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>, turns: Vec<Turn>) -> Self {
        Self {
            id: id.into(),
            created_at,
            updated_at: Utc::now(),
            turns,
        }
    }
}

/// Session ids come from the client on restore; only allow filename-safe
/// characters so an id can never escape the sessions directory.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Directory-backed store of session records.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the sessions directory if needed.
    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Atomically write a record: temp file in the same directory, then
    /// rename over the target.
    pub async fn save(&self, record: &SessionRecord) -> std::io::Result<()> {
        let target = self.path_for(&record.id);
        let tmp = self.dir.join(format!("{}.json.tmp", record.id));

        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| std::io::Error::other(format!("serialize session: {e}")))?;
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &target).await?;

        debug!(id = %record.id, turns = record.turns.len(), "session saved");
        Ok(())
    }

    /// Load a record if one exists and parses. Corrupt files are renamed
    /// aside and treated as absent.
    pub async fn load(&self, id: &str) -> Option<SessionRecord> {
        if !is_valid_session_id(id) {
            warn!(id, "rejecting malformed session id");
            return None;
        }
        let path = self.path_for(id);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(id, "failed to read session file: {e}");
                return None;
            }
        };

        match serde_json::from_slice::<SessionRecord>(&raw) {
            Ok(record) => {
                info!(id, turns = record.turns.len(), "session restored");
                Some(record)
            }
            Err(e) => {
                warn!(id, "session file corrupt, renaming aside: {e}");
                let corrupt = path.with_extension("json.corrupt");
                if let Err(rename_err) = tokio::fs::rename(&path, &corrupt).await {
                    warn!(id, "failed to quarantine corrupt session: {rename_err}");
                }
                None
            }
        }
    }
}
