//! Generate command - Build one graph and emit its template.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use strata_graph::{Generator, OutputFormat, TemplateEmitter};

use super::ConfigArgs;

#[derive(Args, Debug)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Additional schema the merged configuration must satisfy
    #[arg(long)]
    pub extra_schema: Option<PathBuf>,

    /// Write the template to this file
    #[arg(short, long, required_unless_present = "stdout", conflicts_with = "stdout")]
    pub output: Option<PathBuf>,

    /// Write the template to standard output
    #[arg(long)]
    pub stdout: bool,

    /// Template format (json or yaml)
    #[arg(long, default_value = "json")]
    pub format: OutputFormat,
}

pub fn execute(args: GenerateArgs) -> Result<()> {
    info!("Generating template from {:?}", args.config.yaml);

    let inputs = args.config.load(args.extra_schema.as_deref())?;
    let generator = Generator::builtin().context("Failed to load unit registry")?;
    let template = generator
        .generate(&inputs)
        .with_context(|| format!("Failed to generate template from {:?}", args.config.yaml))?;

    match &args.output {
        Some(path) => {
            TemplateEmitter::write(&template, args.format, path)
                .with_context(|| format!("Failed to write template to {:?}", path))?;
            println!(
                "✅ Wrote {} resources to {}",
                template.resources.len(),
                path.display()
            );
        }
        None => {
            print!("{}", TemplateEmitter::emit(&template, args.format)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn args(yaml: PathBuf, output: PathBuf) -> GenerateArgs {
        GenerateArgs {
            config: ConfigArgs {
                yaml,
                defaults: None,
                schema: None,
            },
            extra_schema: None,
            output: Some(output),
            stdout: false,
            format: OutputFormat::Json,
        }
    }

    #[test]
    fn test_generate_writes_template_file() {
        let dir = tempdir().unwrap();
        let yaml = dir.path().join("stack.yaml");
        fs::write(
            &yaml,
            "keypair: ops\nautoscaling_units:\n  - unit_title: web\n    dependencies: [db1]\ndatabase_units:\n  - unit_title: db1\n",
        )
        .unwrap();
        let output = dir.path().join("out").join("stack.json");

        execute(args(yaml, output.clone())).unwrap();

        let rendered = fs::read_to_string(&output).unwrap();
        assert!(rendered.contains("\"webAsg5432Todb15432Ingress\""));
        assert!(rendered.contains("\"AWSTemplateFormatVersion\""));
    }

    #[test]
    fn test_generate_reports_validation_failure() {
        let dir = tempdir().unwrap();
        let yaml = dir.path().join("stack.yaml");
        fs::write(&yaml, "autoscaling_units:\n  - unit_title: web\n").unwrap();
        let output = dir.path().join("stack.json");

        let error = execute(args(yaml, output.clone())).unwrap_err();
        assert!(format!("{:#}", error).contains("keypair"));
        assert!(!output.exists());
    }
}
