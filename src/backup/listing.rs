// pgvault/src/backup/listing.rs
use std::fmt::Write;

use chrono::{DateTime, Local, Utc};

use crate::backup::retention::{LocalBackup, local_backups};
use crate::backup::s3_upload::{RemoteObject, RemoteStore, remote_key};
use crate::config::Config;
use crate::errors::Result;
use crate::utils::format_mb;

const RULE: &str = "==================================================";

fn header(out: &mut String, title: &str) {
    let _ = writeln!(out, "\n{}\n  {}\n{}", RULE, title, RULE);
}

fn row(out: &mut String, name: &str, size: u64, modified: Option<DateTime<Utc>>) {
    let when = modified
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    let _ = writeln!(out, "  {} | {} | {}", name, format_mb(size), when);
}

/// Local section, newest file name first.
pub fn render_local(mut backups: Vec<LocalBackup>) -> String {
    let mut out = String::new();
    header(&mut out, "LOCAL BACKUPS");
    if backups.is_empty() {
        out.push_str("  (none)\n");
        return out;
    }
    backups.sort_by(|a, b| b.name.cmp(&a.name));
    for backup in &backups {
        row(&mut out, &backup.name, backup.size, Some(backup.modified));
    }
    out
}

/// Remote section, most recently modified first. Listing errors are shown inline.
pub fn render_remote(listing: Result<Vec<RemoteObject>>) -> String {
    let mut out = String::new();
    header(&mut out, "R2 BACKUPS");
    let mut objects = match listing {
        Ok(objects) => objects,
        Err(e) => {
            let _ = writeln!(out, "  Error: {}", e);
            return out;
        }
    };
    if objects.is_empty() {
        out.push_str("  (none)\n");
        return out;
    }
    objects.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
    for object in &objects {
        let name = object.key.rsplit('/').next().unwrap_or(&object.key);
        row(&mut out, name, object.size, object.last_modified);
    }
    out
}

/// Prints local backups and, when a remote is configured, remote backups.
pub async fn list_backups<R: RemoteStore>(config: &Config, remote: Option<&R>) -> Result<()> {
    print!("{}", render_local(local_backups(&config.backup_dir)?));

    if let Some(remote) = remote {
        let listing = remote.list(&remote_key(&config.remote_prefix, "")).await;
        print!("{}", render_remote(listing));
    }
    Ok(())
}
