//! schema subcommand
//!
//! Loads a form definition and prints a summary of its fields.

use crate::schema::{load_path, FormSchema};
use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Arguments for the schema subcommand
#[derive(Args, Debug, Clone)]
pub struct SchemaArgs {
    /// Schema operation
    #[command(subcommand)]
    pub command: SchemaCommand,
}

/// Schema operations
#[derive(Subcommand, Debug, Clone)]
pub enum SchemaCommand {
    /// Load a form definition (.csv, .json, .yaml) and report problems
    Check {
        /// Path to the form definition
        path: PathBuf,
    },
}

/// Execute the schema command
pub fn execute(args: &SchemaArgs) -> Result<i32, anyhow::Error> {
    match &args.command {
        SchemaCommand::Check { path } => {
            let schema = load_path(path)?;
            print!("{}", summarize(&schema));
            Ok(0)
        }
    }
}

fn summarize(schema: &FormSchema) -> String {
    let mut out = format!("Form '{}': {} field(s)\n", schema.name(), schema.len());
    out.push_str("NAME\tKIND\tREQUIRED\tCONSTRAINTS\n");
    for field in schema.fields() {
        let mut constraints = Vec::new();
        if let Some(min) = &field.min {
            constraints.push(format!("min={}", min));
        }
        if let Some(max) = &field.max {
            constraints.push(format!("max={}", max));
        }
        if !field.choices.is_empty() {
            constraints.push(format!("choices={}", field.choices.join("|")));
        }
        if field.condition.is_some() {
            constraints.push("conditional".to_string());
        }
        if field.validity_expression.is_some() {
            constraints.push("cross-field".to_string());
        }
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\n",
            field.name,
            field.kind,
            if field.required { "yes" } else { "no" },
            constraints.join(" ")
        ));
    }
    out
}
