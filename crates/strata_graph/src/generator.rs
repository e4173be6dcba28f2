//! End-to-end generation pipeline.
//!
//! Merge, validate, collect units, allocate topology, build, in that order.
//! Nothing is allocated or synthesized until the configuration has been
//! fully validated.

use std::collections::BTreeSet;

use serde_yaml::Value;
use tracing::{info, warn};

use strata_config::{
    count_units, ConfigError, ConfigLoader, ConfigMerger, ConfigTree, ConfigValidator,
    SchemaRegistry,
};

use crate::builder::UnitGraphBuilder;
use crate::error::{GraphError, GraphResult};
use crate::foundation::NetworkSettings;
use crate::resolver::{CatalogEntry, ExportCatalog, ReferenceResolver};
use crate::template::Template;
use crate::topology::TopologyProvider;
use crate::unit::{conventional_port, UnitDescriptor};

/// Configuration documents for one build.
#[derive(Debug, Clone)]
pub struct GeneratorInputs {
    pub user: ConfigTree,
    pub defaults: ConfigTree,
    pub schema: ConfigTree,
    /// Optional second schema applied to the merged tree.
    pub extra_schema: Option<ConfigTree>,
}

impl GeneratorInputs {
    /// User values over the built-in defaults and schema.
    pub fn with_builtins(user: ConfigTree) -> GraphResult<Self> {
        Ok(Self {
            user,
            defaults: ConfigLoader::builtin_defaults()?,
            schema: ConfigLoader::builtin_schema()?,
            extra_schema: None,
        })
    }
}

/// A validated configuration ready to be built.
#[derive(Debug, Clone)]
pub struct PreparedGraph {
    pub united: ConfigTree,
    pub settings: NetworkSettings,
    pub units: Vec<UnitDescriptor>,
}

pub struct Generator {
    registry: SchemaRegistry,
}

impl Generator {
    pub fn new(registry: SchemaRegistry) -> Self {
        Self { registry }
    }

    pub fn builtin() -> GraphResult<Self> {
        Ok(Self::new(SchemaRegistry::builtin()?))
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Merge and validate, returning the united tree.
    pub fn validate_only(&self, inputs: &GeneratorInputs) -> GraphResult<ConfigTree> {
        let united = ConfigMerger::new(&self.registry)?.merge(&inputs.user, &inputs.defaults)?;

        let mut validator = ConfigValidator::new(&self.registry, &inputs.schema)?;
        if let Some(extra) = &inputs.extra_schema {
            validator = validator.with_extra_schema(extra)?;
        }
        validator.validate(&united)?;

        info!(
            "Configuration valid: {} units declared",
            count_units(&united, &self.registry)
        );
        Ok(united)
    }

    /// Validate and extract settings and unit descriptors.
    pub fn prepare(&self, inputs: &GeneratorInputs) -> GraphResult<PreparedGraph> {
        let united = self.validate_only(inputs)?;
        let settings = NetworkSettings::from_config(&united)?;
        let units = UnitDescriptor::from_config(&united, &self.registry)?;
        Ok(PreparedGraph {
            united,
            settings,
            units,
        })
    }

    /// Generate the template for a standalone or leaf graph.
    ///
    /// The cross-graph resolver is selected when the graph belongs to a tree
    /// or declares external units.
    pub fn generate(&self, inputs: &GeneratorInputs) -> GraphResult<Template> {
        let prepared = self.prepare(inputs)?;
        let settings = &prepared.settings;

        let resolver = if settings.tree_name.is_some() || !settings.external_units.is_empty() {
            ReferenceResolver::CrossGraph(ExportCatalog::from_external(
                &settings.external_units,
                &self.registry,
            )?)
        } else {
            ReferenceResolver::Local
        };

        let provider = settings.provider()?;
        UnitGraphBuilder::new(&self.registry, resolver).build(&prepared.units, settings, &provider, None)
    }
}

/// One leaf configuration of a tree, identified for reporting and as the
/// fallback graph name.
#[derive(Debug, Clone)]
pub struct LeafInput {
    pub id: String,
    pub config: ConfigTree,
}

#[derive(Debug, Clone)]
pub struct TreeInputs {
    /// Foundation configuration; its `graph_name` names the tree.
    pub tree: ConfigTree,
    pub leaves: Vec<LeafInput>,
    pub defaults: ConfigTree,
    pub schema: ConfigTree,
}

#[derive(Debug, Clone)]
pub struct TreeOutput {
    pub tree_name: String,
    pub foundation: Template,
    /// Leaf templates keyed by graph name, in input order.
    pub leaves: Vec<(String, Template)>,
}

/// Builds a tree: one foundation template owning the network plus one
/// template per leaf, leaves referencing each other through exports.
pub struct TreeGenerator {
    generator: Generator,
}

impl TreeGenerator {
    pub fn new(registry: SchemaRegistry) -> Self {
        Self {
            generator: Generator::new(registry),
        }
    }

    pub fn builtin() -> GraphResult<Self> {
        Ok(Self::new(SchemaRegistry::builtin()?))
    }

    pub fn generate(&self, inputs: &TreeInputs) -> GraphResult<TreeOutput> {
        let registry = self.generator.registry();

        let mut foundation = self.generator.prepare(&GeneratorInputs {
            user: inputs.tree.clone(),
            defaults: inputs.defaults.clone(),
            schema: inputs.schema.clone(),
            extra_schema: None,
        })?;
        if let Some(unit) = foundation.units.first() {
            return Err(GraphError::Config(ConfigError::InvalidValue {
                key: unit.name.clone(),
                message: "units belong in leaf configurations, not the tree".to_string(),
            }));
        }
        if foundation.settings.tree_name.take().is_some() {
            warn!("Ignoring tree_name in the tree configuration; the tree owns its network");
        }
        let tree_name = foundation.settings.graph_name.clone();
        info!("Generating tree {} with {} leaves", tree_name, inputs.leaves.len());

        let leaf_defaults = self.leaf_defaults(&foundation, &inputs.defaults);
        let mut prepared = Vec::with_capacity(inputs.leaves.len());
        let mut catalog = ExportCatalog::new();
        let mut graph_names = BTreeSet::from([tree_name.clone()]);

        for leaf in &inputs.leaves {
            let mut user = leaf.config.clone();
            if !user.contains_key("graph_name") {
                user.insert("graph_name", Value::String(leaf.id.clone()));
            }
            if user.get_str("tree_name").is_some_and(|t| t != tree_name) {
                warn!("Leaf {} names another tree; building it as part of {}", leaf.id, tree_name);
            }
            user.insert("tree_name", Value::String(tree_name.clone()));
            if let Some(zones) = foundation.united.get("availability_zones") {
                user.insert("availability_zones", zones.clone());
            }

            let leaf_graph = self.generator.prepare(&GeneratorInputs {
                user,
                defaults: leaf_defaults.clone(),
                schema: inputs.schema.clone(),
                extra_schema: None,
            })?;
            if !graph_names.insert(leaf_graph.settings.graph_name.clone()) {
                return Err(GraphError::Config(ConfigError::InvalidValue {
                    key: "graph_name".to_string(),
                    message: format!(
                        "leaf {} reuses graph name '{}' within tree {}",
                        leaf.id, leaf_graph.settings.graph_name, tree_name
                    ),
                }));
            }

            for unit in &leaf_graph.units {
                let spec = registry.kind(unit.kind).ok_or(GraphError::UnknownKind(unit.kind))?;
                catalog.insert(
                    &unit.name,
                    CatalogEntry {
                        graph: leaf_graph.settings.graph_name.clone(),
                        kind: unit.kind,
                        port: conventional_port(spec, &unit.config),
                    },
                )?;
            }
            prepared.push(leaf_graph);
        }

        let foundation_provider = foundation.settings.provider()?;
        let foundation_template = UnitGraphBuilder::new(registry, ReferenceResolver::Local).build(
            &[],
            &foundation.settings,
            &foundation_provider,
            Some(&tree_name),
        )?;

        let mut leaves = Vec::with_capacity(prepared.len());
        for leaf in &prepared {
            let provider = TopologyProvider::Imported {
                tree_name: tree_name.clone(),
                zone_count: leaf.settings.availability_zones.len(),
            };
            let template = UnitGraphBuilder::new(registry, ReferenceResolver::CrossGraph(catalog.clone()))
                .build(&leaf.units, &leaf.settings, &provider, None)?;
            leaves.push((leaf.settings.graph_name.clone(), template));
        }

        Ok(TreeOutput {
            tree_name,
            foundation: foundation_template,
            leaves,
        })
    }

    /// Environment defaults overlaid with the tree's merged top-level values.
    fn leaf_defaults(&self, foundation: &PreparedGraph, defaults: &ConfigTree) -> ConfigTree {
        let mut leaf_defaults = defaults.clone();
        for key in self.generator.registry().top_level_keys() {
            if key == "graph_name" || key == "tree_name" {
                continue;
            }
            if let Some(value) = foundation.united.get(key) {
                leaf_defaults.insert(key.clone(), value.clone());
            }
        }
        leaf_defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_only_returns_united_tree() {
        let generator = Generator::builtin().unwrap();
        let inputs = GeneratorInputs::with_builtins(ConfigTree::from_yaml_str("keypair: k\n").unwrap()).unwrap();
        let united = generator.validate_only(&inputs).unwrap();
        assert_eq!(united.get_str("keypair"), Some("k"));
        assert!(united.contains_key("autoscaling_units"));
    }

    #[test]
    fn test_extra_schema_is_applied() {
        let generator = Generator::builtin().unwrap();
        let mut inputs =
            GeneratorInputs::with_builtins(ConfigTree::from_yaml_str("keypair: k\n").unwrap()).unwrap();
        inputs.extra_schema = Some(
            ConfigTree::from_yaml_str("type: object\nrequired: [owner_emails]\nproperties:\n  owner_emails:\n    minItems: 1\n")
                .unwrap(),
        );
        let result = generator.validate_only(&inputs);
        assert!(matches!(result, Err(GraphError::Config(ConfigError::Schema { .. }))));
    }

    #[test]
    fn test_external_units_select_cross_graph_resolution() {
        let generator = Generator::builtin().unwrap();
        let inputs = GeneratorInputs::with_builtins(
            ConfigTree::from_yaml_str(
                r#"
keypair: k
external_units:
  - {graph: shared, name: db1, kind: database}
autoscaling_units:
  - unit_title: app1
    dependencies: [db1]
"#,
            )
            .unwrap(),
        )
        .unwrap();
        let template = generator.generate(&inputs).unwrap();
        assert!(template.resource("app1Asg5432Toshareddb15432Ingress").is_some());
        assert!(template.export_names().contains(&"strata-app1-SecurityGroup"));
    }

    #[test]
    fn test_tree_rejects_units_in_foundation() {
        let generator = TreeGenerator::builtin().unwrap();
        let inputs = TreeInputs {
            tree: ConfigTree::from_yaml_str("graph_name: core\nkeypair: k\ndatabase_units:\n  - unit_title: db1\n").unwrap(),
            leaves: Vec::new(),
            defaults: ConfigLoader::builtin_defaults().unwrap(),
            schema: ConfigLoader::builtin_schema().unwrap(),
        };
        assert!(matches!(
            generator.generate(&inputs),
            Err(GraphError::Config(ConfigError::InvalidValue { .. }))
        ));
    }
}
