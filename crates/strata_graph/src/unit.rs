//! Unit descriptors extracted from a merged configuration.

use std::fmt;
use std::str::FromStr;

use serde_yaml::Value;

use strata_config::{ConfigError, ConfigTree, KindSpec, SchemaRegistry, UnitKind};

use crate::boundary::Port;
use crate::error::{GraphError, GraphResult};

/// One `name[:port]` dependency entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub target: String,
    /// Explicit port; `None` means the target kind's conventional port.
    pub port: Option<Port>,
}

impl FromStr for Dependency {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GraphError::InvalidDependency(s.to_string());

        let (target, port) = match s.split_once(':') {
            Some((target, port)) => {
                let port = port.parse::<i64>().ok().and_then(Port::from_i64).ok_or_else(invalid)?;
                (target, Some(port))
            }
            None => (s, None),
        };

        if target.is_empty() || !target.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid());
        }

        Ok(Self {
            target: target.to_string(),
            port,
        })
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.target, port.number()),
            None => write!(f, "{}", self.target),
        }
    }
}

/// One declared deployable unit.
#[derive(Debug, Clone)]
pub struct UnitDescriptor {
    pub name: String,
    pub kind: UnitKind,
    /// The unit's merged configuration sub-tree.
    pub config: ConfigTree,
    pub dependencies: Vec<Dependency>,
}

impl UnitDescriptor {
    /// Collect descriptors from every unit section, sections in registry
    /// order and units in list order.
    pub fn from_config(tree: &ConfigTree, registry: &SchemaRegistry) -> GraphResult<Vec<Self>> {
        let mut units = Vec::new();

        for spec in registry.kinds() {
            let Some(list) = tree.get_list(&spec.section) else {
                continue;
            };
            for (index, item) in list.iter().enumerate() {
                let location = format!("{}[{}]", spec.section, index);
                let config = item
                    .as_mapping()
                    .map(|m| ConfigTree::from_mapping(m.clone()))
                    .ok_or_else(|| invalid_value(&location, "expected a mapping"))?;
                units.push(Self::from_unit_config(spec, config, &location)?);
            }
        }

        Ok(units)
    }

    fn from_unit_config(spec: &KindSpec, config: ConfigTree, location: &str) -> GraphResult<Self> {
        let name = config
            .get_str("unit_title")
            .ok_or_else(|| invalid_value(location, "missing unit_title"))?
            .to_string();

        let dependencies = match config.get("dependencies") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Sequence(entries)) => entries
                .iter()
                .map(|entry| match entry.as_str() {
                    Some(s) => s.parse(),
                    None => Err(GraphError::InvalidDependency(format!("{:?}", entry))),
                })
                .collect::<GraphResult<Vec<Dependency>>>()?,
            Some(_) => return Err(invalid_value(location, "dependencies must be a list")),
        };

        Ok(Self {
            name,
            kind: spec.kind,
            config,
            dependencies,
        })
    }
}

/// Port a unit of this kind listens on when a dependency names no port.
pub fn conventional_port(spec: &KindSpec, config: &ConfigTree) -> Option<Port> {
    spec.port_field
        .as_deref()
        .and_then(|field| config.get_path(field))
        .and_then(Value::as_i64)
        .or(spec.default_port)
        .and_then(Port::from_i64)
}

fn invalid_value(location: &str, message: &str) -> GraphError {
    GraphError::Config(ConfigError::InvalidValue {
        key: location.to_string(),
        message: message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_parsing() {
        let bare: Dependency = "db1".parse().unwrap();
        assert_eq!(bare.port, None);

        let explicit: Dependency = "db1:5432".parse().unwrap();
        assert_eq!(explicit.port, Some(Port::Tcp(5432)));

        let all: Dependency = "app1:-1".parse().unwrap();
        assert_eq!(all.port, Some(Port::All));
        assert_eq!(all.to_string(), "app1:-1");
    }

    #[test]
    fn test_dependency_rejects_malformed_entries() {
        for entry in ["", ":80", "db1:", "db1:http", "db1:0", "db1:65536", "db-1:80"] {
            assert!(
                matches!(entry.parse::<Dependency>(), Err(GraphError::InvalidDependency(_))),
                "{} should be rejected",
                entry
            );
        }
    }

    #[test]
    fn test_from_config_collects_in_registry_order() {
        let registry = SchemaRegistry::builtin().unwrap();
        let tree = ConfigTree::from_yaml_str(
            r#"
database_units:
  - unit_title: db1
autoscaling_units:
  - unit_title: app1
    dependencies: ["db1:5432"]
  - unit_title: app2
"#,
        )
        .unwrap();

        let units = UnitDescriptor::from_config(&tree, &registry).unwrap();
        let names: Vec<_> = units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["app1", "app2", "db1"]);
        assert_eq!(units[0].kind, UnitKind::ComputePool);
        assert_eq!(units[0].dependencies[0].target, "db1");
    }

    #[test]
    fn test_conventional_port_prefers_configured_value() {
        let registry = SchemaRegistry::builtin().unwrap();
        let pool = registry.kind(UnitKind::ComputePool).unwrap();
        let config = ConfigTree::from_yaml_str("loadbalancer:\n  loadbalancer_port: 8080\n").unwrap();
        assert_eq!(conventional_port(pool, &config), Some(Port::Tcp(8080)));
        assert_eq!(conventional_port(pool, &ConfigTree::new()), Some(Port::Tcp(80)));

        let function = registry.kind(UnitKind::Function).unwrap();
        assert_eq!(conventional_port(function, &ConfigTree::new()), None);
    }
}
