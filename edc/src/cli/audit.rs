//! audit subcommand
//!
//! Appends, verifies, queries and exports the audit log.

use crate::audit::{
    actions, export, AuditFilter, AuditLog, AuditLogConfig, AuditStatus, NewAuditEvent,
};
use crate::cli::OutputFormat;
use crate::common::error::EdcError;
use crate::config::EdcConfig;
use crate::db::{migrations::initialize_database, SqliteAuditStore};
use crate::schema::temporal::parse_datetime;
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use sqlx::SqlitePool;
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Exit status when the hash chain does not verify
pub const EXIT_CHAIN_BROKEN: i32 = 1;

/// Arguments for the audit subcommand
#[derive(Args, Debug, Clone)]
pub struct AuditArgs {
    /// Audit operation
    #[command(subcommand)]
    pub command: AuditCommand,
}

/// Audit operations
#[derive(Subcommand, Debug, Clone)]
pub enum AuditCommand {
    /// Append one event
    Append(AppendArgs),
    /// Verify the hash chain
    Verify,
    /// List entries matching a filter
    Query(QueryArgs),
    /// Export the whole log with a SHA-256 checksum
    Export(ExportArgs),
}

/// audit append
#[derive(Args, Debug, Clone)]
pub struct AppendArgs {
    /// Acting user
    #[arg(long)]
    pub user: String,
    /// Event type (LOGIN, CREATE, EXPORT, ...)
    #[arg(long)]
    pub action: String,
    /// Affected resource
    #[arg(long)]
    pub resource: String,
    /// Outcome (success, failure, denied, ...)
    #[arg(long, default_value = "success")]
    pub status: String,
    /// Free-text detail
    #[arg(long)]
    pub detail: Option<String>,
}

/// audit query
#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Filter by user
    #[arg(long)]
    pub user: Option<String>,
    /// Filter by action
    #[arg(long)]
    pub action: Option<String>,
    /// Filter by status
    #[arg(long)]
    pub status: Option<String>,
    /// Earliest timestamp (inclusive, RFC 3339 or `YYYY-MM-DD HH:MM:SS` UTC)
    #[arg(long, value_parser = parse_timestamp)]
    pub from: Option<DateTime<Utc>>,
    /// Latest timestamp (inclusive)
    #[arg(long, value_parser = parse_timestamp)]
    pub to: Option<DateTime<Utc>>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,
}

impl QueryArgs {
    fn filter(&self) -> AuditFilter {
        AuditFilter {
            user_id: self.user.clone(),
            action: self.action.clone(),
            status: self.status.as_deref().map(AuditStatus::from),
            ..AuditFilter::default()
        }
        .between(self.from, self.to)
    }
}

/// audit export
#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Destination file
    #[arg(long, short)]
    pub output: PathBuf,
    /// Export format
    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    pub format: OutputFormat,
    /// Export even if the chain does not verify
    #[arg(long)]
    pub force: bool,
    /// User recorded as the exporter
    #[arg(long, default_value = "system")]
    pub user: String,
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw.trim()) {
        return Ok(dt.with_timezone(&Utc));
    }
    parse_datetime(raw)
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid timestamp '{}'", raw))
}

/// Open the SQLite database and build an audit log over it.
pub(crate) async fn open_audit_log(
    config: &EdcConfig,
) -> Result<(SqlitePool, AuditLog), anyhow::Error> {
    let pool = initialize_database(&config.database_url).await?;
    let store = SqliteAuditStore::new(pool.clone());
    Ok((pool, AuditLog::new(Arc::new(store), AuditLogConfig::from(config))))
}

/// Execute the audit command
pub async fn execute(args: &AuditArgs, config: &EdcConfig) -> Result<i32, anyhow::Error> {
    let (_pool, log) = open_audit_log(config).await?;
    run(&args.command, &log).await
}

async fn run(command: &AuditCommand, log: &AuditLog) -> Result<i32, anyhow::Error> {
    match command {
        AuditCommand::Append(args) => {
            let mut event = NewAuditEvent::new(
                args.user.as_str(),
                args.action.as_str(),
                args.resource.as_str(),
                args.status.as_str(),
            );
            event.detail = args.detail.clone();
            let entry = log.append(event).await?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
            Ok(0)
        }
        AuditCommand::Verify => {
            let result = log.verify().await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.ok {
                Ok(0)
            } else {
                error!(
                    first_break_sequence = ?result.first_break_sequence,
                    reason = ?result.reason,
                    "Audit chain verification failed"
                );
                Ok(EXIT_CHAIN_BROKEN)
            }
        }
        AuditCommand::Query(args) => {
            let entries = log.query(args.filter()).collect().await?;
            let stdout = std::io::stdout();
            export::export(args.format.into(), &entries, stdout.lock())?;
            if args.format == OutputFormat::Json {
                println!();
            }
            Ok(0)
        }
        AuditCommand::Export(args) => {
            let verification = log.verify().await?;
            if let Some(violation) = verification.violation() {
                if !args.force {
                    return Err(EdcError::from(violation).into());
                }
                error!(%violation, "Exporting audit log with a broken chain (--force)");
            }

            let entries = log.query(AuditFilter::default()).collect().await?;
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&args.output)
                .map_err(|e| {
                    anyhow::anyhow!("Failed to open '{}': {}", args.output.display(), e)
                })?;
            let summary = export::export(args.format.into(), &entries, BufWriter::new(file))?;

            let detail = format!(
                "format={}, entries={}, sha256={}, chain_ok={}",
                match args.format {
                    OutputFormat::Json => "json",
                    OutputFormat::Csv => "csv",
                },
                summary.entries,
                summary.sha256,
                verification.ok
            );
            log.append(
                NewAuditEvent::new(
                    args.user.as_str(),
                    actions::EXPORT,
                    "audit_log",
                    AuditStatus::Success,
                )
                .with_detail(detail),
            )
            .await?;
            info!(
                path = %args.output.display(),
                entries = summary.entries,
                sha256 = %summary.sha256,
                "Audit log exported"
            );

            println!(
                "Exported {} entries to {}",
                summary.entries,
                args.output.display()
            );
            println!("sha256: {}", summary.sha256);
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryAuditStore;

    fn memory_log() -> AuditLog {
        AuditLog::new(Arc::new(MemoryAuditStore::new()), AuditLogConfig::default())
    }

    #[test]
    fn test_parse_timestamp_accepts_rfc3339_and_naive() {
        let a = parse_timestamp("2024-05-01T12:00:00Z").unwrap();
        let b = parse_timestamp("2024-05-01 12:00:00").unwrap();
        assert_eq!(a, b);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[tokio::test]
    async fn test_export_writes_file_and_records_event() {
        let log = memory_log();
        log.append(NewAuditEvent::new("u1", actions::LOGIN, "session", "success"))
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("audit.csv");
        let command = AuditCommand::Export(ExportArgs {
            output: output.clone(),
            format: OutputFormat::Csv,
            force: false,
            user: "auditor".to_string(),
        });
        assert_eq!(run(&command, &log).await.unwrap(), 0);

        let written = std::fs::read_to_string(&output).unwrap();
        assert_eq!(written.lines().count(), 2);

        let exports = log
            .query(AuditFilter::default().action(actions::EXPORT))
            .collect()
            .await
            .unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].user_id, "auditor");
        assert!(exports[0].detail.as_deref().unwrap().contains("entries=1"));
    }

    #[tokio::test]
    async fn test_verify_exit_status_on_intact_log() {
        let log = memory_log();
        log.append(NewAuditEvent::new("u1", actions::LOGOUT, "session", "success"))
            .await
            .unwrap();
        assert_eq!(run(&AuditCommand::Verify, &log).await.unwrap(), 0);
    }
}
