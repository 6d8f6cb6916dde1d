//! EDC command-line entry point

use clap::Parser;
use edc::cli::{self, Cli};
use edc::config::EdcConfig;
use edc::logging;

fn main() {
    let cli = Cli::parse();
    let config = EdcConfig::from_env().with_database_url(cli.database_url.clone());

    let guard = match logging::init(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    let code = match runtime.block_on(cli::execute(cli.command, &config)) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            cli::exit_code(&e)
        }
    };

    drop(runtime);
    drop(guard);
    std::process::exit(code);
}
