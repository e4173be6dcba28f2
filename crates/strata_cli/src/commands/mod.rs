//! CLI command definitions.
//!
//! This module defines the command structure for the strata CLI.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use strata_config::{ConfigLoader, ConfigTree};
use strata_graph::GeneratorInputs;

pub mod generate;
pub mod tree;
pub mod validate;

/// strata - unit composition and security-flow synthesis
#[derive(Parser)]
#[command(name = "strata")]
#[command(version, about = "strata - infrastructure templates from declared units")]
#[command(long_about = r#"
strata merges a unit configuration over environment defaults, validates it,
allocates the network, wires security-group flows from declared
dependencies and emits a provisioning template.

COMMANDS:
  generate  → Build one graph and emit its template
  validate  → Merge and validate a configuration without building
  tree      → Build a network foundation plus cross-referencing leaf graphs

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Validation failure
  5 - Build failure
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a template for one graph
    Generate(generate::GenerateArgs),

    /// Merge and validate a configuration
    Validate(validate::ValidateArgs),

    /// Generate a tree foundation and its leaf templates
    Tree(tree::TreeArgs),
}

/// Configuration documents shared by `generate` and `validate`.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// User configuration (YAML)
    #[arg(short = 'y', long = "yaml", env = "STRATA_YAML")]
    pub yaml: PathBuf,

    /// Environment defaults (YAML); built-in defaults when omitted
    #[arg(short, long, env = "STRATA_DEFAULTS")]
    pub defaults: Option<PathBuf>,

    /// JSON Schema expressed as YAML; built-in schema when omitted
    #[arg(short, long, env = "STRATA_SCHEMA")]
    pub schema: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn load(&self, extra_schema: Option<&Path>) -> Result<GeneratorInputs> {
        let user = ConfigLoader::read_tree(&self.yaml)
            .with_context(|| format!("Failed to read configuration {:?}", self.yaml))?;
        let (defaults, schema) = load_defaults_and_schema(self.defaults.as_deref(), self.schema.as_deref())?;
        let extra_schema = extra_schema
            .map(|path| {
                ConfigLoader::read_tree(path).with_context(|| format!("Failed to read schema {:?}", path))
            })
            .transpose()?;

        Ok(GeneratorInputs {
            user,
            defaults,
            schema,
            extra_schema,
        })
    }
}

pub fn load_defaults_and_schema(
    defaults: Option<&Path>,
    schema: Option<&Path>,
) -> Result<(ConfigTree, ConfigTree)> {
    let defaults = ConfigLoader::read_or(defaults, ConfigLoader::builtin_defaults)
        .context("Failed to load defaults")?;
    let schema = ConfigLoader::read_or(schema, ConfigLoader::builtin_schema)
        .context("Failed to load schema")?;
    Ok((defaults, schema))
}
