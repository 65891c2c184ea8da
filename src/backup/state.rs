// pgvault/src/backup/state.rs
use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::errors::{BackupError, Result};

/// Number of history entries kept in the state file.
pub const MAX_HISTORY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub file: String,
    pub hash: String,
    /// Set only when the dump reached remote storage.
    pub remote_key: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Everything remembered between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupState {
    pub last_hash: Option<String>,
    #[serde(default)]
    pub backups: Vec<BackupEntry>,
    #[serde(default)]
    pub last_upload: Option<DateTime<Utc>>,
}

impl BackupState {
    /// Reads the state file, or returns the empty state when it does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(BackupState::default());
        }
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|source| BackupError::State {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Replaces the state file wholesale.
    ///
    /// The JSON is written to a sibling temp file and renamed into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|source| BackupError::State {
            path: path.to_path_buf(),
            source,
        })?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| BackupError::Io(e.error))?;
        Ok(())
    }

    /// Records a new digest and appends a history entry, trimming the oldest
    /// entries beyond [`MAX_HISTORY`].
    ///
    /// The entry is appended even when `remote_key` is `None`: local-only runs
    /// and runs whose upload failed stay in the history with a null key.
    pub fn record(&mut self, file: &str, hash: &str, remote_key: Option<String>, now: DateTime<Utc>) {
        self.last_hash = Some(hash.to_string());
        self.last_upload = Some(now);
        self.backups.push(BackupEntry {
            file: file.to_string(),
            hash: hash.to_string(),
            remote_key,
            timestamp: now,
        });
        if self.backups.len() > MAX_HISTORY {
            let excess = self.backups.len() - MAX_HISTORY;
            self.backups.drain(..excess);
        }
    }
}
