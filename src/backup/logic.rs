// pgvault/src/backup/logic.rs
use std::fs;

use chrono::{DateTime, Local, Utc};
use tracing::{info, warn};

use crate::backup::db_dump::{self, DumpFile};
use crate::backup::fingerprint::hash_file;
use crate::backup::retention::{cleanup_local, cleanup_remote};
use crate::backup::s3_upload::{RemoteStore, UploadOutcome, upload_backup};
use crate::backup::state::BackupState;
use crate::config::Config;
use crate::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The dump was kept, offered to remote storage and recorded in state.
    Stored,
    /// The dump matched the last recorded digest and was deleted.
    Skipped,
}

#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub file_name: String,
    pub hash: String,
    /// `None` when the run skipped the upload step entirely.
    pub upload: Option<UploadOutcome>,
    pub removed_local: usize,
    pub removed_remote: usize,
}

/// Hashes a fresh dump. A dump that cannot be hashed is removed so it is not
/// left behind unrecorded.
fn fingerprint_or_discard(dump: &DumpFile) -> Result<String> {
    hash_file(&dump.path).inspect_err(|e| {
        warn!("Failed to hash {}: {}", dump.file_name, e);
        db_dump::remove_partial_dump(&dump.path);
    })
}

/// One incremental backup run:
/// produce, fingerprint, upload or skip, persist state, clean up.
///
/// Only a dump failure (or a local filesystem error) is returned as `Err`;
/// remote problems degrade to a local-only backup.
pub async fn perform_backup_orchestration<R: RemoteStore>(
    config: &Config,
    remote: Option<&R>,
    force: bool,
    now: DateTime<Local>,
) -> Result<RunReport> {
    let mut state = BackupState::load(&config.state_file)?;
    let now_utc = now.with_timezone(&Utc);

    let dump = db_dump::create_dump(config, now).await?;

    let hash = fingerprint_or_discard(&dump)?;
    let changed = state.last_hash.as_deref() != Some(hash.as_str());
    if changed {
        info!("Changes detected");
    } else {
        info!("No changes (hash match)");
    }

    let (outcome, upload) = if changed || force {
        if !changed {
            info!("Forced upload of unchanged backup");
        }
        let upload = upload_backup(remote, &config.remote_prefix, &dump).await;
        state.record(&dump.file_name, &hash, upload.key().map(str::to_string), now_utc);
        state.save(&config.state_file)?;
        (RunOutcome::Stored, Some(upload))
    } else {
        fs::remove_file(&dump.path)?;
        (RunOutcome::Skipped, None)
    };

    info!("Cleanup");
    let removed_local = cleanup_local(&config.backup_dir, config.keep_local_days, now_utc)?;
    let removed_remote = cleanup_remote(remote, &config.remote_prefix, config.keep_remote_days, now_utc).await;

    Ok(RunReport {
        outcome,
        file_name: dump.file_name,
        hash,
        upload,
        removed_local,
        removed_remote,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::test_support::MemoryStore;
    use crate::errors::BackupError;
    use chrono::{TimeDelta, TimeZone};
    use tempfile::TempDir;

    const SAME_DUMP: &str = "printf 'CREATE TABLE users (id int);\\n'";

    fn at(minute: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 3, minute, 0).unwrap()
    }

    fn dump_path(config: &Config, minute: u32) -> std::path::PathBuf {
        config.backup_dir.join(db_dump::dump_file_name("app", at(minute)))
    }

    #[tokio::test]
    async fn test_unchanged_then_forced_scenario() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let config = Config::for_tests(root.path(), SAME_DUMP);

        // Run 1: first dump, remote not configured.
        let first = perform_backup_orchestration::<MemoryStore>(&config, None, false, at(0)).await?;
        assert_eq!(first.outcome, RunOutcome::Stored);
        assert!(matches!(first.upload, Some(UploadOutcome::NotConfigured)));
        let state = BackupState::load(&config.state_file)?;
        assert_eq!(state.last_hash.as_deref(), Some(first.hash.as_str()));
        assert_eq!(state.backups.len(), 1);
        assert_eq!(state.backups[0].remote_key, None);
        assert!(dump_path(&config, 0).exists());

        // Run 2: identical content is deleted and state is untouched.
        let second = perform_backup_orchestration::<MemoryStore>(&config, None, false, at(1)).await?;
        assert_eq!(second.outcome, RunOutcome::Skipped);
        assert_eq!(second.hash, first.hash);
        assert!(second.upload.is_none());
        assert!(!dump_path(&config, 1).exists());
        assert!(dump_path(&config, 0).exists());
        assert_eq!(BackupState::load(&config.state_file)?, state);

        // Run 3: forced, identical content is still recorded.
        let third = perform_backup_orchestration::<MemoryStore>(&config, None, true, at(2)).await?;
        assert_eq!(third.outcome, RunOutcome::Stored);
        assert_eq!(third.hash, first.hash);
        assert!(dump_path(&config, 2).exists());
        let state = BackupState::load(&config.state_file)?;
        assert_eq!(state.backups.len(), 2);
        assert_eq!(state.backups[1].file, third.file_name);
        assert_eq!(state.backups[1].hash, first.hash);
        assert_eq!(state.last_upload, Some(at(2).with_timezone(&Utc)));
        Ok(())
    }

    #[tokio::test]
    async fn test_changed_content_is_uploaded_once_with_key() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let mut config = Config::for_tests(root.path(), "printf 'v1\\n'");
        let store = MemoryStore::default();

        perform_backup_orchestration(&config, Some(&store), false, at(0)).await?;
        config.dump_command_mut().args[1] = "printf 'v2\\n'".to_string();
        let report = perform_backup_orchestration(&config, Some(&store), false, at(1)).await?;

        assert_eq!(report.outcome, RunOutcome::Stored);
        let expected_key = format!("backups/{}", report.file_name);
        assert_eq!(report.upload.as_ref().and_then(|u| u.key()), Some(expected_key.as_str()));
        assert_eq!(store.keys().len(), 2);

        let state = BackupState::load(&config.state_file)?;
        assert_eq!(state.backups.len(), 2);
        assert_eq!(state.backups[1].remote_key.as_deref(), Some(expected_key.as_str()));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_upload_still_records_digest() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let config = Config::for_tests(root.path(), SAME_DUMP);
        let store = MemoryStore::failing();

        let report = perform_backup_orchestration(&config, Some(&store), false, at(0)).await?;

        assert_eq!(report.outcome, RunOutcome::Stored);
        assert!(matches!(report.upload, Some(UploadOutcome::Failed { .. })));
        let state = BackupState::load(&config.state_file)?;
        assert_eq!(state.last_hash.as_deref(), Some(report.hash.as_str()));
        assert_eq!(state.backups.len(), 1);
        assert_eq!(state.backups[0].remote_key, None);
        assert!(dump_path(&config, 0).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_dump_failure_leaves_no_file_and_no_state() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let config = Config::for_tests(root.path(), "echo 'half a dump'; exit 1");

        let err = perform_backup_orchestration::<MemoryStore>(&config, None, true, at(0))
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::DumpFailed { .. }));
        assert!(!config.state_file.exists());
        assert!(!dump_path(&config, 0).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_cleanup_runs_even_when_skipped() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let config = Config::for_tests(root.path(), SAME_DUMP);
        let store = MemoryStore::default();

        perform_backup_orchestration(&config, Some(&store), false, at(0)).await?;
        store.insert("backups/backup_app_ancient.sql", 1, at(0).with_timezone(&Utc) - TimeDelta::days(45));

        let report = perform_backup_orchestration(&config, Some(&store), false, at(1)).await?;

        assert_eq!(report.outcome, RunOutcome::Skipped);
        assert_eq!(report.removed_remote, 1);
        assert!(!store.keys().contains(&"backups/backup_app_ancient.sql".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_second_run_in_same_second_keeps_recorded_dump() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let mut config = Config::for_tests(root.path(), SAME_DUMP);

        let first = perform_backup_orchestration::<MemoryStore>(&config, None, false, at(0)).await?;
        let recorded = BackupState::load(&config.state_file)?;

        // Same content, same timestamp.
        let err = perform_backup_orchestration::<MemoryStore>(&config, None, false, at(0))
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::DumpExists(_)));
        assert_eq!(fs::read_to_string(dump_path(&config, 0))?, "CREATE TABLE users (id int);\n");

        // Failing dump, same timestamp.
        config.dump_command_mut().args[1] = "echo 'half a dump'; exit 1".to_string();
        let err = perform_backup_orchestration::<MemoryStore>(&config, None, true, at(0))
            .await
            .unwrap_err();
        assert!(err.is_dump_failure());
        assert_eq!(fs::read_to_string(dump_path(&config, 0))?, "CREATE TABLE users (id int);\n");

        let state = BackupState::load(&config.state_file)?;
        assert_eq!(state, recorded);
        assert_eq!(state.backups[0].file, first.file_name);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_unhashable_dump_is_discarded() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let path = root.path().join("backup_app_20240501_030000.sql");
        std::os::unix::fs::symlink(root.path().join("gone.sql"), &path)?;
        let dump = DumpFile {
            path: path.clone(),
            file_name: "backup_app_20240501_030000.sql".to_string(),
            size: 1,
        };

        let err = fingerprint_or_discard(&dump).unwrap_err();

        assert!(matches!(err, BackupError::Io(_)));
        assert!(fs::symlink_metadata(&path).is_err());
        Ok(())
    }
}
