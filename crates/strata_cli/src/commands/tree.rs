//! Tree command - Build a network foundation and its leaf graphs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tracing::{debug, info};
use walkdir::WalkDir;

use strata_config::ConfigLoader;
use strata_graph::{LeafInput, OutputFormat, TemplateEmitter, TreeGenerator, TreeInputs};

use super::load_defaults_and_schema;

#[derive(Args, Debug)]
pub struct TreeArgs {
    /// Tree configuration owning the shared network
    #[arg(short, long)]
    pub tree: PathBuf,

    /// Directory searched recursively for leaf configurations
    #[arg(long)]
    pub leaves: PathBuf,

    /// Directory receiving one template per graph
    #[arg(short, long)]
    pub output: PathBuf,

    /// Environment defaults (YAML); built-in defaults when omitted
    #[arg(short, long)]
    pub defaults: Option<PathBuf>,

    /// JSON Schema expressed as YAML; built-in schema when omitted
    #[arg(short, long)]
    pub schema: Option<PathBuf>,

    /// Template format (json or yaml)
    #[arg(long, default_value = "json")]
    pub format: OutputFormat,
}

pub fn execute(args: TreeArgs) -> Result<()> {
    info!("Generating tree from {:?}", args.tree);

    let tree = ConfigLoader::read_tree(&args.tree)
        .with_context(|| format!("Failed to read tree configuration {:?}", args.tree))?;
    let (defaults, schema) = load_defaults_and_schema(args.defaults.as_deref(), args.schema.as_deref())?;

    let mut leaves = Vec::new();
    for path in discover_leaves(&args.leaves, &args.tree)? {
        let config = ConfigLoader::read_tree(&path)
            .with_context(|| format!("Failed to read leaf configuration {:?}", path))?;
        leaves.push(LeafInput {
            id: leaf_id(&path),
            config,
        });
    }

    let generator = TreeGenerator::builtin().context("Failed to load unit registry")?;
    let output = generator
        .generate(&TreeInputs {
            tree,
            leaves,
            defaults,
            schema,
        })
        .with_context(|| format!("Failed to generate tree from {:?}", args.tree))?;

    fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create output directory {:?}", args.output))?;

    let extension = args.format.extension();
    let foundation_path = args.output.join(format!("{}.{}", output.tree_name, extension));
    TemplateEmitter::write(&output.foundation, args.format, &foundation_path)?;
    println!("✅ Foundation {} → {}", output.tree_name, foundation_path.display());

    for (name, template) in &output.leaves {
        let path = args.output.join(format!("{}.{}", name, extension));
        TemplateEmitter::write(template, args.format, &path)?;
        println!("✅ Leaf {} → {}", name, path.display());
    }

    Ok(())
}

/// YAML files under `dir`, sorted by path. The tree file itself is skipped
/// when it lives inside `dir`.
pub fn discover_leaves(dir: &Path, tree: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("Leaves directory not found: {:?}", dir);
    }
    let tree = fs::canonicalize(tree).ok();

    let mut leaves = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {:?}", dir))?;
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if !entry.file_type().is_file() || !is_yaml {
            continue;
        }
        if tree.is_some() && fs::canonicalize(path).ok() == tree {
            continue;
        }
        debug!("Found leaf {:?}", path);
        leaves.push(path.to_path_buf());
    }

    leaves.sort();
    Ok(leaves)
}

fn leaf_id(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("leaf")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_discover_leaves_is_sorted_and_skips_tree_file() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("web.yaml"), "").unwrap();
        fs::write(dir.path().join("nested").join("data.yml"), "").unwrap();
        fs::write(dir.path().join("tree.yaml"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let leaves = discover_leaves(dir.path(), &dir.path().join("tree.yaml")).unwrap();
        let ids: Vec<String> = leaves.iter().map(|p| leaf_id(p)).collect();
        assert_eq!(ids, vec!["data", "web"]);
    }

    #[test]
    fn test_tree_writes_foundation_and_leaves() {
        let dir = tempdir().unwrap();
        let leaves_dir = dir.path().join("leaves");
        fs::create_dir_all(&leaves_dir).unwrap();

        let tree = dir.path().join("tree.yaml");
        fs::write(&tree, "graph_name: core\nkeypair: ops\navailability_zones: [az1, az2]\n").unwrap();
        fs::write(leaves_dir.join("data.yaml"), "database_units:\n  - unit_title: db1\n").unwrap();
        fs::write(
            leaves_dir.join("web.yaml"),
            "autoscaling_units:\n  - unit_title: app1\n    dependencies: [db1]\n",
        )
        .unwrap();

        let output = dir.path().join("out");
        execute(TreeArgs {
            tree,
            leaves: leaves_dir,
            output: output.clone(),
            defaults: None,
            schema: None,
            format: OutputFormat::Json,
        })
        .unwrap();

        let foundation = fs::read_to_string(output.join("core.json")).unwrap();
        assert!(foundation.contains("\"core-Vpc\""));
        let web = fs::read_to_string(output.join("web.json")).unwrap();
        assert!(web.contains("\"data-db1-SecurityGroup\""));
        assert!(output.join("data.json").exists());
    }

    #[test]
    fn test_missing_leaves_directory() {
        let dir = tempdir().unwrap();
        let result = discover_leaves(&dir.path().join("absent"), &dir.path().join("tree.yaml"));
        assert!(result.is_err());
    }
}
