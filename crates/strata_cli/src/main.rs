//! strata CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Validation failure
//! - 5: Build failure

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands};
use strata_config::ConfigError;
use strata_graph::GraphError;

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const VALIDATION_FAILURE: u8 = 3;
    pub const BUILD_FAILURE: u8 = 5;
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let result = match cli.command {
        Commands::Generate(args) => commands::generate::execute(args),
        Commands::Validate(args) => commands::validate::execute(args),
        Commands::Tree(args) => commands::tree::execute(args),
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Logs go to stderr so templates written to stdout stay clean.
fn init_logging(cli: &Cli) {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    let log_result = if cli.log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };

    if log_result.is_err() {
        // Logging already initialized, continue
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(error) = cause.downcast_ref::<GraphError>() {
            return match error {
                GraphError::Config(inner) => categorize_config_error(inner),
                GraphError::Io(_) => ExitCodes::GENERAL_ERROR,
                GraphError::Yaml(_) | GraphError::Json(_) => ExitCodes::GENERAL_ERROR,
                _ => ExitCodes::BUILD_FAILURE,
            };
        }
        if let Some(error) = cause.downcast_ref::<ConfigError>() {
            return categorize_config_error(error);
        }
    }
    ExitCodes::GENERAL_ERROR
}

fn categorize_config_error(e: &ConfigError) -> u8 {
    match e {
        ConfigError::Schema { .. }
        | ConfigError::SecretLeak { .. }
        | ConfigError::CapacityRange { .. }
        | ConfigError::InvalidValue { .. }
        | ConfigError::InvalidFormat { .. } => ExitCodes::VALIDATION_FAILURE,
        ConfigError::Io(_) => ExitCodes::INVALID_ARGS,
        _ => ExitCodes::GENERAL_ERROR,
    }
}
