//! Configuration file loading.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::tree::ConfigTree;

const BUILTIN_DEFAULTS: &str = include_str!("../data/defaults.yaml");
const BUILTIN_SCHEMA: &str = include_str!("../data/schema.yaml");

/// Reader for configuration documents.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Read a YAML configuration file into a tree.
    pub fn read_tree(path: impl AsRef<Path>) -> ConfigResult<ConfigTree> {
        let path = path.as_ref();
        debug!("Reading configuration from {:?}", path);

        let content = fs::read_to_string(path)?;
        ConfigTree::from_yaml_str(&content).map_err(|e| match e {
            ConfigError::Yaml(inner) => ConfigError::InvalidFormat {
                path: path.to_path_buf(),
                message: inner.to_string(),
            },
            ConfigError::InvalidValue { message, .. } => ConfigError::InvalidFormat {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// Read `path` when given, otherwise fall back to `builtin`.
    pub fn read_or(path: Option<&Path>, builtin: fn() -> ConfigResult<ConfigTree>) -> ConfigResult<ConfigTree> {
        match path {
            Some(path) => Self::read_tree(path),
            None => builtin(),
        }
    }

    /// Environment defaults shipped with the crate.
    pub fn builtin_defaults() -> ConfigResult<ConfigTree> {
        ConfigTree::from_yaml_str(BUILTIN_DEFAULTS)
    }

    /// JSON Schema (as YAML) shipped with the crate.
    pub fn builtin_schema() -> ConfigResult<ConfigTree> {
        ConfigTree::from_yaml_str(BUILTIN_SCHEMA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_tree_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("user.yaml");
        fs::write(&path, "keypair: mine\navailability_zones: [a, b]\n").unwrap();

        let tree = ConfigLoader::read_tree(&path).unwrap();
        assert_eq!(tree.get_str("keypair"), Some("mine"));
    }

    #[test]
    fn test_read_tree_reports_path_on_bad_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        fs::write(&path, "keypair: [unterminated\n").unwrap();

        match ConfigLoader::read_tree(&path) {
            Err(ConfigError::InvalidFormat { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected InvalidFormat, got {:?}", other),
        }
    }

    #[test]
    fn test_read_or_uses_builtin_when_no_path() {
        let tree = ConfigLoader::read_or(None, ConfigLoader::builtin_defaults).unwrap();
        assert_eq!(tree.get_i64("db_port"), Some(5432));
    }

    #[test]
    fn test_builtin_schema_parses() {
        let schema = ConfigLoader::builtin_schema().unwrap();
        assert!(schema.contains_key("properties"));
        assert!(schema.to_json().is_ok());
    }
}
