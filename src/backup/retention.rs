// pgvault/src/backup/retention.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use tracing::{info, warn};

use crate::backup::s3_upload::{RemoteStore, remote_key};
use crate::errors::Result;

static BACKUP_FILE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^backup_.*\.sql$").expect("backup file pattern is valid"));

/// A dump file found in the local backup directory.
#[derive(Debug, Clone)]
pub struct LocalBackup {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

pub fn is_backup_file_name(name: &str) -> bool {
    BACKUP_FILE_PATTERN.is_match(name)
}

/// `now - days`; `None` when the window reaches past the representable range.
fn cutoff(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_days(days).and_then(|delta| now.checked_sub_signed(delta))
}

/// Lists dump files in `dir`. A missing directory has no backups.
pub fn local_backups(dir: &Path) -> Result<Vec<LocalBackup>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut backups = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if !is_backup_file_name(&name) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        backups.push(LocalBackup {
            name,
            path: entry.path(),
            size: metadata.len(),
            modified: DateTime::<Utc>::from(metadata.modified()?),
        });
    }
    Ok(backups)
}

/// Deletes local dumps modified strictly before `now - keep_days`.
pub fn cleanup_local(dir: &Path, keep_days: i64, now: DateTime<Utc>) -> Result<usize> {
    let Some(cutoff) = cutoff(now, keep_days) else {
        return Ok(0);
    };

    let mut removed = 0;
    for backup in local_backups(dir)? {
        if backup.modified < cutoff {
            fs::remove_file(&backup.path)?;
            removed += 1;
        }
    }

    if removed > 0 {
        info!("Removed {} old local backup(s)", removed);
    }
    Ok(removed)
}

/// Deletes remote objects under `prefix` last modified strictly before
/// `now - keep_days`. Remote errors are logged, never returned.
pub async fn cleanup_remote<R: RemoteStore>(
    remote: Option<&R>,
    prefix: &str,
    keep_days: i64,
    now: DateTime<Utc>,
) -> usize {
    let Some(remote) = remote else {
        return 0;
    };
    let Some(cutoff) = cutoff(now, keep_days) else {
        return 0;
    };

    let objects = match remote.list(&remote_key(prefix, "")).await {
        Ok(objects) => objects,
        Err(e) => {
            warn!("R2 cleanup error: {}", e);
            return 0;
        }
    };

    let mut removed = 0;
    for object in objects {
        let expired = object.last_modified.is_some_and(|modified| modified < cutoff);
        if !expired {
            continue;
        }
        match remote.delete(&object.key).await {
            Ok(()) => removed += 1,
            Err(e) => warn!("R2 cleanup error: {}", e),
        }
    }

    if removed > 0 {
        info!("Removed {} old R2 backup(s)", removed);
    }
    removed
}
