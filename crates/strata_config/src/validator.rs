//! Validation of a merged configuration tree.
//!
//! Validation runs in two stages: JSON Schema validation of the whole tree
//! (plus an optional second schema), then semantic checks the schema cannot
//! express, namely capacity ranges and credential-free boot scripts.

use jsonschema::JSONSchema;
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::merger::{check_capacity, unit_label};
use crate::registry::SchemaRegistry;
use crate::secrets::SecretScanner;
use crate::tree::ConfigTree;

/// Validation result with details.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn merge(&mut self, other: ValidationResult) {
        if !other.valid {
            self.valid = false;
        }
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Convert into a [`ConfigError::Schema`] when any error was recorded.
    pub fn into_result(self) -> ConfigResult<()> {
        if self.valid {
            Ok(())
        } else {
            Err(ConfigError::Schema { paths: self.errors })
        }
    }
}

/// Validator for merged configuration trees.
pub struct ConfigValidator<'a> {
    registry: &'a SchemaRegistry,
    schema: JSONSchema,
    extra_schema: Option<JSONSchema>,
    scanner: SecretScanner,
}

impl<'a> ConfigValidator<'a> {
    /// Compile `schema` (a JSON Schema expressed as YAML).
    pub fn new(registry: &'a SchemaRegistry, schema: &ConfigTree) -> ConfigResult<Self> {
        Ok(Self {
            registry,
            schema: compile(schema)?,
            extra_schema: None,
            scanner: SecretScanner::new()?,
        })
    }

    /// Add a second schema every tree must also satisfy.
    pub fn with_extra_schema(mut self, schema: &ConfigTree) -> ConfigResult<Self> {
        self.extra_schema = Some(compile(schema)?);
        Ok(self)
    }

    /// Check the tree against the schema(s), collecting every violation.
    pub fn check_schema(&self, tree: &ConfigTree) -> ConfigResult<ValidationResult> {
        let instance = tree.to_json()?;
        let mut result = ValidationResult::new();

        for schema in std::iter::once(&self.schema).chain(self.extra_schema.as_ref()) {
            if let Err(errors) = schema.validate(&instance) {
                for error in errors {
                    let path = error.instance_path.to_string();
                    let path = if path.is_empty() { "/".to_string() } else { path };
                    result.add_error(format!("{}: {}", path, error));
                }
            }
        }

        for spec in self.registry.kinds() {
            if !tree.contains_key(&spec.section) {
                result.add_warning(format!("Section '{}' is missing", spec.section));
            }
        }

        Ok(result)
    }

    /// Enforce invariants the schema cannot express.
    pub fn check_semantics(&self, tree: &ConfigTree) -> ConfigResult<()> {
        for spec in self.registry.kinds() {
            let Some(units) = tree.get_list(&spec.section) else {
                continue;
            };
            for (index, unit) in units.iter().enumerate() {
                let Some(unit_map) = unit.as_mapping() else {
                    continue;
                };
                let label = unit_label(spec, index, unit_map);
                for field in &spec.boot_script_fields {
                    if let Some(value) = unit_map.get(field.as_str()) {
                        self.scanner.check(&label, field, value)?;
                    }
                }
                if let Some(capacity) = &spec.capacity {
                    let unit_tree = ConfigTree::from_mapping(unit_map.clone());
                    check_capacity(&label, &unit_tree, capacity)?;
                }
            }
        }
        Ok(())
    }

    /// Full validation: schema first, then semantic invariants.
    pub fn validate(&self, tree: &ConfigTree) -> ConfigResult<()> {
        info!("Validating merged configuration");
        let result = self.check_schema(tree)?;
        for warning in &result.warnings {
            debug!("Validation warning: {}", warning);
        }
        result.into_result()?;
        self.check_semantics(tree)
    }
}

fn compile(schema: &ConfigTree) -> ConfigResult<JSONSchema> {
    let document = schema.to_json()?;
    JSONSchema::compile(&document).map_err(|e| ConfigError::InvalidSchema(e.to_string()))
}

/// Number of units declared across every unit section.
pub fn count_units(tree: &ConfigTree, registry: &SchemaRegistry) -> usize {
    registry
        .kinds()
        .filter_map(|spec| tree.get_list(&spec.section))
        .map(|units| units.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ConfigLoader;
    use serde_yaml::Value;

    fn base_tree(extra: &str) -> ConfigTree {
        let content = format!(
            r#"
graph_name: demo
keypair: demo-key
availability_zones: [ap-southeast-2a]
vpc_cidr: {{name: VPC, cidr: 10.0.0.0/16}}
public_cidr: {{name: PublicIp, cidr: 0.0.0.0/0}}
home_cidrs: []
nat_image_id: ami-nat
nat_instance_type: t2.nano
jump_image_id: ami-jump
jump_instance_type: t2.nano
{}
"#,
            extra
        );
        ConfigTree::from_yaml_str(&content).unwrap()
    }

    #[test]
    fn test_minimal_tree_is_valid() {
        let registry = SchemaRegistry::builtin().unwrap();
        let schema = ConfigLoader::builtin_schema().unwrap();
        let validator = ConfigValidator::new(&registry, &schema).unwrap();

        assert!(validator.validate(&base_tree("")).is_ok());
    }

    #[test]
    fn test_schema_errors_report_paths() {
        let registry = SchemaRegistry::builtin().unwrap();
        let schema = ConfigLoader::builtin_schema().unwrap();
        let validator = ConfigValidator::new(&registry, &schema).unwrap();

        let tree = base_tree(
            r#"
autoscaling_units:
  - unit_title: "bad name"
    dependencies: []
    minsize: 1
    maxsize: 1
    image_id: ami
    instance_type: t2.nano
    loadbalancer: {protocol: HTTP, instance_port: 80, loadbalancer_port: 80}
"#,
        );

        match validator.validate(&tree) {
            Err(ConfigError::Schema { paths }) => {
                assert!(paths.iter().any(|p| p.starts_with("/autoscaling_units/0/unit_title")));
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_required_key_reported_at_root() {
        let registry = SchemaRegistry::builtin().unwrap();
        let schema = ConfigLoader::builtin_schema().unwrap();
        let validator = ConfigValidator::new(&registry, &schema).unwrap();

        let mut tree = ConfigTree::new();
        tree.insert("graph_name", Value::String("demo".into()));

        let result = validator.check_schema(&tree).unwrap();
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.starts_with("/:") && e.contains("keypair")));
    }

    #[test]
    fn test_extra_schema_is_also_enforced() {
        let registry = SchemaRegistry::builtin().unwrap();
        let schema = ConfigLoader::builtin_schema().unwrap();
        let extra = ConfigTree::from_yaml_str(
            "type: object\nrequired: [owner]\n",
        )
        .unwrap();
        let validator = ConfigValidator::new(&registry, &schema)
            .unwrap()
            .with_extra_schema(&extra)
            .unwrap();

        assert!(matches!(validator.validate(&base_tree("")), Err(ConfigError::Schema { .. })));
        assert!(validator.validate(&base_tree("owner: ops")).is_ok());
    }

    #[test]
    fn test_semantic_capacity_check() {
        let registry = SchemaRegistry::builtin().unwrap();
        let schema = ConfigLoader::builtin_schema().unwrap();
        let validator = ConfigValidator::new(&registry, &schema).unwrap();

        let tree = base_tree(
            r#"
autoscaling_units:
  - unit_title: app1
    dependencies: []
    minsize: 5
    maxsize: 2
    image_id: ami
    instance_type: t2.nano
    loadbalancer: {protocol: HTTP, instance_port: 80, loadbalancer_port: 80}
"#,
        );

        assert!(matches!(
            validator.validate(&tree),
            Err(ConfigError::CapacityRange { min: 5, max: 2, .. })
        ));
    }

    #[test]
    fn test_invalid_schema_document() {
        let registry = SchemaRegistry::builtin().unwrap();
        let schema = ConfigTree::from_yaml_str("type: 12\n").unwrap();
        assert!(matches!(
            ConfigValidator::new(&registry, &schema),
            Err(ConfigError::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_validation_result_merge() {
        let mut first = ValidationResult::new();
        first.add_warning("w");
        let mut second = ValidationResult::new();
        second.add_error("e");

        first.merge(second);
        assert!(!first.valid);
        assert_eq!(first.errors, vec!["e".to_string()]);
        assert_eq!(first.warnings.len(), 1);
    }
}
