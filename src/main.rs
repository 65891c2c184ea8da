//! Incremental PostgreSQL backup tool
//!
//! Dumps a containerized database, uploads changed dumps to Cloudflare R2 and
//! applies retention to both the local directory and the bucket.

// pgvault/src/main.rs
mod backup;
mod config;
mod errors;
mod utils;

use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use backup::RunOutcome;
use backup::s3_upload::UploadOutcome;
use config::Config;

#[derive(Parser, Debug)]
#[command(name = "pgvault", version, about = "Incremental PostgreSQL backups to Cloudflare R2")]
struct Cli {
    /// Upload and record the dump even if it is unchanged since the last backup
    #[arg(long, conflicts_with = "list")]
    force: bool,

    /// List local and R2 backups
    #[arg(long)]
    list: bool,
}

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // .env only fills in variables that are not already set.
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match run_app(cli).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration from environment")?;

    if cli.list {
        backup::run_list_flow(&config).await.context("Failed to list backups")?;
        return Ok(());
    }

    println!("{}", "=".repeat(50));
    println!("  INCREMENTAL BACKUP TO R2");
    println!("  {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!("{}", "=".repeat(50));

    let report = match backup::run_backup_flow(&config, cli.force).await {
        Ok(report) => report,
        Err(e) if e.is_dump_failure() => {
            println!("\n❌ BACKUP FAILED!");
            return Err(e.into());
        }
        Err(e) => return Err(anyhow::Error::new(e).context("Backup run failed")),
    };

    match report.outcome {
        RunOutcome::Stored => println!("\n✅ Backup completed: {} ({})", report.file_name, report.hash),
        RunOutcome::Skipped => println!("\n⏭️ Skipped (no changes)"),
    }
    if let Some(UploadOutcome::Failed { error }) = &report.upload {
        println!("⚠️ Upload failed, backup kept locally only: {}", error);
    }
    if report.removed_local + report.removed_remote > 0 {
        println!(
            "🧹 Removed {} local and {} R2 backup(s) past retention",
            report.removed_local, report.removed_remote
        );
    }
    Ok(())
}
