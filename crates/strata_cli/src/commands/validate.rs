//! Validate command - Merge and validate a configuration.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use strata_config::count_units;
use strata_graph::Generator;

use super::ConfigArgs;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Additional schema the merged configuration must satisfy
    #[arg(long)]
    pub extra_schema: Option<PathBuf>,

    /// Print the merged configuration after validation
    #[arg(long)]
    pub print_merged: bool,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    info!("Validating configuration: {:?}", args.config.yaml);

    let inputs = args.config.load(args.extra_schema.as_deref())?;
    let generator = Generator::builtin().context("Failed to load unit registry")?;
    let united = generator
        .validate_only(&inputs)
        .with_context(|| format!("Validation failed for {:?}", args.config.yaml))?;

    if args.print_merged {
        print!("{}", serde_yaml::to_string(&united)?);
    } else {
        println!(
            "✅ Configuration valid: {} units",
            count_units(&united, generator.registry())
        );
    }

    Ok(())
}
