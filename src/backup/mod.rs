mod logic;
pub(crate) mod db_dump;
pub(crate) mod fingerprint;
pub(crate) mod listing;
pub(crate) mod retention;
pub(crate) mod s3_upload;
pub(crate) mod state;
#[cfg(test)]
mod test_support;

use chrono::Local;

use crate::config::Config;
use crate::errors::Result;
pub use logic::{RunOutcome, RunReport};
use s3_upload::S3Store;

async fn connect_remote(config: &Config) -> Option<S3Store> {
    match &config.remote {
        Some(remote_config) => Some(S3Store::connect(remote_config).await),
        None => None,
    }
}

/// Public entry point for an incremental backup run.
pub async fn run_backup_flow(config: &Config, force: bool) -> Result<RunReport> {
    let remote = connect_remote(config).await;
    logic::perform_backup_orchestration(config, remote.as_ref(), force, Local::now()).await
}

/// Prints local and remote backups.
pub async fn run_list_flow(config: &Config) -> Result<()> {
    let remote = connect_remote(config).await;
    listing::list_backups(config, remote.as_ref()).await
}
