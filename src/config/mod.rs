// pgvault/src/config/mod.rs
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{BackupError, Result};

const DEFAULT_CONTAINER_NAME: &str = "postgres";
const DEFAULT_PREFIX: &str = "backups";
const DEFAULT_BACKUP_DIR: &str = "dumps";
const DEFAULT_STATE_FILE: &str = "backup_state.json";
const DEFAULT_KEEP_LOCAL_DAYS: i64 = 7;
const DEFAULT_KEEP_REMOTE_DAYS: i64 = 30;
const DEFAULT_DUMP_TIMEOUT_SECS: u64 = 600;

/// Credentials and bucket for the S3-compatible (R2) remote tier.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
}

impl RemoteConfig {
    pub fn endpoint_url(&self) -> String {
        format!("https://{}.r2.cloudflarestorage.com", self.account_id)
    }
}

/// External command that writes a plaintext SQL dump to stdout.
#[derive(Debug, Clone, PartialEq)]
pub struct DumpCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl DumpCommand {
    /// `docker exec <container> pg_dump -U <user> -d <db> --no-owner --no-acl`
    pub fn docker_pg_dump(container: &str, db_user: &str, db_name: &str) -> Self {
        DumpCommand {
            program: "docker".to_string(),
            args: vec![
                "exec".into(),
                container.into(),
                "pg_dump".into(),
                "-U".into(),
                db_user.into(),
                "-d".into(),
                db_name.into(),
                "--no-owner".into(),
                "--no-acl".into(),
            ],
        }
    }
}

/// The database being backed up and the command that dumps it.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub container_name: String,
    pub db_name: String,
    pub db_user: String,
    pub dump_command: DumpCommand,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` when neither DB_NAME nor DB_USER is set; listing works without it.
    pub database: Option<DatabaseConfig>,
    pub dump_timeout: Duration,
    pub backup_dir: PathBuf,
    pub state_file: PathBuf,
    pub remote: Option<RemoteConfig>,
    pub remote_prefix: String,
    pub keep_local_days: i64,
    pub keep_remote_days: i64,
}

impl Config {
    /// Database settings, required for a backup run.
    pub fn database(&self) -> Result<&DatabaseConfig> {
        self.database
            .as_ref()
            .ok_or_else(|| BackupError::Config("DB_NAME and DB_USER must be set to run a backup".to_string()))
    }

    /// Reads the process environment. `.env` defaults are applied by the caller.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let container_name = get("CONTAINER_NAME").unwrap_or_else(|| DEFAULT_CONTAINER_NAME.to_string());
        let database = match (get("DB_NAME"), get("DB_USER")) {
            (Some(db_name), Some(db_user)) => Some(DatabaseConfig {
                dump_command: DumpCommand::docker_pg_dump(&container_name, &db_user, &db_name),
                container_name,
                db_name,
                db_user,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(BackupError::Config("DB_USER must be set".to_string())),
            (None, Some(_)) => return Err(BackupError::Config("DB_NAME must be set".to_string())),
        };

        let remote = match (
            get("R2_ACCOUNT_ID"),
            get("R2_ACCESS_KEY_ID"),
            get("R2_SECRET_ACCESS_KEY"),
            get("R2_BUCKET_NAME"),
        ) {
            (Some(account_id), Some(access_key_id), Some(secret_access_key), Some(bucket_name)) => {
                Some(RemoteConfig {
                    account_id,
                    access_key_id,
                    secret_access_key,
                    bucket_name,
                })
            }
            (account, key, secret, bucket) => {
                if account.is_some() || key.is_some() || secret.is_some() || bucket.is_some() {
                    tracing::warn!(
                        "R2 configuration is incomplete (R2_ACCOUNT_ID, R2_ACCESS_KEY_ID, R2_SECRET_ACCESS_KEY, R2_BUCKET_NAME); remote storage is disabled"
                    );
                }
                None
            }
        };

        let remote_prefix = get("R2_PREFIX")
            .map(|p| p.trim_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_PREFIX.to_string());

        let keep_local_days = parse_days(get("KEEP_LOCAL_DAYS"), "KEEP_LOCAL_DAYS", DEFAULT_KEEP_LOCAL_DAYS)?;
        let keep_remote_days = parse_days(get("KEEP_REMOTE_DAYS"), "KEEP_REMOTE_DAYS", DEFAULT_KEEP_REMOTE_DAYS)?;

        let dump_timeout = match get("DUMP_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.parse().map_err(|_| {
                    BackupError::Config(format!("DUMP_TIMEOUT_SECS must be a whole number of seconds, got '{}'", raw))
                })?;
                if secs == 0 {
                    return Err(BackupError::Config("DUMP_TIMEOUT_SECS must be greater than zero".to_string()));
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_DUMP_TIMEOUT_SECS),
        };

        Ok(Config {
            database,
            dump_timeout,
            backup_dir: get("BACKUP_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR)),
            state_file: get("STATE_FILE").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
            remote,
            remote_prefix,
            keep_local_days,
            keep_remote_days,
        })
    }
}

#[cfg(test)]
impl Config {
    /// Local-only configuration rooted in `root`, dumping with `sh -c <script>`.
    pub fn for_tests(root: &std::path::Path, script: &str) -> Self {
        Config {
            database: Some(DatabaseConfig {
                container_name: "test-postgres".to_string(),
                db_name: "app".to_string(),
                db_user: "admin".to_string(),
                dump_command: DumpCommand {
                    program: "sh".to_string(),
                    args: vec!["-c".to_string(), script.to_string()],
                },
            }),
            dump_timeout: Duration::from_secs(10),
            backup_dir: root.join("dumps"),
            state_file: root.join("backup_state.json"),
            remote: None,
            remote_prefix: DEFAULT_PREFIX.to_string(),
            keep_local_days: DEFAULT_KEEP_LOCAL_DAYS,
            keep_remote_days: DEFAULT_KEEP_REMOTE_DAYS,
        }
    }

    pub fn dump_command_mut(&mut self) -> &mut DumpCommand {
        &mut self.database.as_mut().expect("test config has a database").dump_command
    }
}

fn parse_days(raw: Option<String>, key: &str, default: i64) -> Result<i64> {
    match raw {
        Some(raw) => match raw.parse::<i64>() {
            Ok(days) if days >= 0 => Ok(days),
            _ => Err(BackupError::Config(format!(
                "{} must be a non-negative number of days, got '{}'",
                key, raw
            ))),
        },
        None => Ok(default),
    }
}
