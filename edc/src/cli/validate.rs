//! validate subcommand
//!
//! Validates a JSON record against a form definition. With `--user` the
//! record is submitted: saved when valid and recorded in the audit log
//! either way.

use crate::cli::audit::open_audit_log;
use crate::config::EdcConfig;
use crate::db::SqliteRecordStore;
use crate::schema::load_path;
use crate::submission::SubmissionService;
use crate::validation::{validate, SubmittedRecord, ValidationResult};
use clap::Args;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

/// Exit status when the record fails validation
pub const EXIT_INVALID: i32 = 2;

/// Arguments for the validate subcommand
#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// Path to the form definition (.csv, .json, .yaml)
    #[arg(long)]
    pub schema: PathBuf,

    /// JSON object of field values, or `-` for stdin
    #[arg(long)]
    pub record: String,

    /// Submit as this user (persist and audit)
    #[arg(long)]
    pub user: Option<String>,
}

/// Execute the validate command
pub async fn execute(args: &ValidateArgs, config: &EdcConfig) -> Result<i32, anyhow::Error> {
    let schema = load_path(&args.schema)?;
    let record = read_record(&args.record)?;

    let result = match &args.user {
        Some(user) => {
            let (pool, audit) = open_audit_log(config).await?;
            let service =
                SubmissionService::new(Arc::new(audit), Arc::new(SqliteRecordStore::new(pool)));
            let outcome = service.submit(user, &schema, &record).await?;
            outcome.result().clone()
        }
        None => validate(&schema, &record),
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(exit_status(&result))
}

fn exit_status(result: &ValidationResult) -> i32 {
    if result.valid {
        0
    } else {
        EXIT_INVALID
    }
}

fn read_record(source: &str) -> Result<SubmittedRecord, anyhow::Error> {
    let mut text = String::new();
    if source == "-" {
        std::io::stdin().read_to_string(&mut text)?;
    } else {
        text = std::fs::read_to_string(source)
            .map_err(|e| anyhow::anyhow!("Failed to read record '{}': {}", source, e))?;
    }
    Ok(serde_json::from_str(&text)?)
}
