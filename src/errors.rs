use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start dump command `{program}`: {source}")]
    DumpSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Dump command exited with {status}: {stderr}")]
    DumpFailed { status: ExitStatus, stderr: String },

    #[error("Dump command timed out after {} seconds", .0.as_secs())]
    DumpTimeout(Duration),

    #[error("Dump command produced no output")]
    DumpEmpty,

    #[error("Dump file {} already exists", .0.display())]
    DumpExists(PathBuf),

    #[error("State file {path}: {source}")]
    State {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Remote storage error: {0}")]
    Remote(String),
}

impl BackupError {
    /// True for the failures that abort a run before any state is touched.
    pub fn is_dump_failure(&self) -> bool {
        matches!(
            self,
            BackupError::DumpSpawn { .. }
                | BackupError::DumpFailed { .. }
                | BackupError::DumpTimeout(_)
                | BackupError::DumpEmpty
                | BackupError::DumpExists(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
