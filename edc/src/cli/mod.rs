//! CLI module for edc
//!
//! Provides the command-line interface for schema checks, record validation
//! and audit log maintenance.

pub mod audit;
pub mod schema;
pub mod validate;

use crate::common::error::{AppendFailure, EdcError, IntegrityViolation, SchemaError};
use crate::config::EdcConfig;
use clap::{Parser, Subcommand, ValueEnum};

/// EDC core - schema-driven form validation and a tamper-evident audit log
#[derive(Parser, Debug)]
#[command(name = "edc")]
#[command(version, about, long_about = None)]
#[command(after_help = r#"ENVIRONMENT VARIABLES:
    EDC_DATABASE_URL            SQLite URL (default: sqlite:data/edc.db)
    EDC_AUDIT_LOCK_TIMEOUT_MS   Audit append lock timeout (default: 5000)
    EDC_AUDIT_APPEND_RETRIES    Audit append retries on conflict (default: 3)
    EDC_AUDIT_QUERY_PAGE_SIZE   Audit rows read per page (default: 256)
    EDC_LOG_LEVEL               Log level (default: info)
    EDC_LOG_DIR                 Directory for daily-rolling log files
"#)]
pub struct Cli {
    /// Database URL (overrides EDC_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Form definition commands
    Schema(schema::SchemaArgs),
    /// Validate a submitted record against a form definition
    Validate(validate::ValidateArgs),
    /// Audit log commands
    Audit(audit::AuditArgs),
}

/// Output format for listings and exports
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// JSON
    #[default]
    Json,
    /// CSV with header row
    Csv,
}

impl From<OutputFormat> for crate::audit::ExportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => Self::Json,
            OutputFormat::Csv => Self::Csv,
        }
    }
}

/// Run a parsed command and return the process exit status.
pub async fn execute(command: Commands, config: &EdcConfig) -> Result<i32, anyhow::Error> {
    match command {
        Commands::Schema(args) => schema::execute(&args),
        Commands::Validate(args) => validate::execute(&args, config).await,
        Commands::Audit(args) => audit::execute(&args, config).await,
    }
}

/// Process exit status for a failed command.
///
/// Integrity violations, audit append failures and schema errors keep their
/// dedicated codes; anything else exits with 1.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<EdcError>() {
        return e.exit_code();
    }
    if err.downcast_ref::<IntegrityViolation>().is_some() {
        return 3;
    }
    if err.downcast_ref::<AppendFailure>().is_some() {
        return 4;
    }
    if err.downcast_ref::<SchemaError>().is_some() {
        return 5;
    }
    1
}
