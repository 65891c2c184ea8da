// pgvault/src/backup/db_dump.rs
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::{Config, DumpCommand};
use crate::errors::{BackupError, Result};
use crate::utils::{find_executable, format_mb};

/// A dump that passed the success checks: non-empty and written by a zero exit.
#[derive(Debug, Clone)]
pub struct DumpFile {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
}

/// `backup_<dbname>_<YYYYMMDD_HHMMSS>.sql`
pub fn dump_file_name(db_name: &str, now: DateTime<Local>) -> String {
    format!("backup_{}_{}.sql", db_name, now.format("%Y%m%d_%H%M%S"))
}

/// Runs the configured dump command into a new file in the backup directory.
///
/// The file is created exclusively: an existing dump with the same name is
/// never opened, truncated or removed. Any later failure removes the file this
/// call created so a truncated dump is never hashed or uploaded.
pub async fn create_dump(config: &Config, now: DateTime<Local>) -> Result<DumpFile> {
    let database = config.database()?;
    fs::create_dir_all(&config.backup_dir)?;

    let file_name = dump_file_name(&database.db_name, now);
    let path = config.backup_dir.join(&file_name);

    info!(
        container = %database.container_name,
        database = %database.db_name,
        user = %database.db_user,
        "Creating backup"
    );

    let output_file = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Err(BackupError::DumpExists(path)),
        Err(e) => return Err(e.into()),
    };

    match run_dump_command(&database.dump_command, output_file, &path, config.dump_timeout).await {
        Ok(size) => {
            info!("Created {} ({})", file_name, format_mb(size));
            Ok(DumpFile { path, file_name, size })
        }
        Err(e) => {
            remove_partial_dump(&path);
            Err(e)
        }
    }
}

async fn run_dump_command(
    command: &DumpCommand,
    output_file: File,
    output_path: &Path,
    timeout: Duration,
) -> Result<u64> {
    let program = find_executable(&command.program).map_err(|source| BackupError::DumpSpawn {
        program: command.program.clone(),
        source,
    })?;

    let child = Command::new(&program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(output_file))
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| BackupError::DumpSpawn {
            program: command.program.clone(),
            source,
        })?;

    // Dropping the wait future on timeout drops the child, which kills it.
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => return Err(BackupError::DumpTimeout(timeout)),
    };

    if !output.status.success() {
        return Err(BackupError::DumpFailed {
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let size = match fs::metadata(output_path) {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };
    if size == 0 {
        return Err(BackupError::DumpEmpty);
    }
    Ok(size)
}

/// Removes a dump this run created. A missing file is not an error.
pub(crate) fn remove_partial_dump(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial dump {}: {}", path.display(), e),
    }
}
