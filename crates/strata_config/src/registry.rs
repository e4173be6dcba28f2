//! Registry of unit kinds and the configuration fields each one carries.
//!
//! The registry is loaded once from YAML (the built-in `data/registry.yaml`
//! unless the caller supplies another document) and is immutable afterwards.
//! Merging, validation and graph construction all consult it instead of
//! hard-coding field lists per unit kind.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

const BUILTIN_REGISTRY: &str = include_str!("../data/registry.yaml");

/// The kinds of deployable unit a graph can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    ComputePool,
    Database,
    Function,
    Gateway,
    Distribution,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::ComputePool => "compute_pool",
            UnitKind::Database => "database",
            UnitKind::Function => "function",
            UnitKind::Gateway => "gateway",
            UnitKind::Distribution => "distribution",
        }
    }

    pub fn all() -> Vec<Self> {
        vec![
            UnitKind::ComputePool,
            UnitKind::Database,
            UnitKind::Function,
            UnitKind::Gateway,
            UnitKind::Distribution,
        ]
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Names of the fields bounding a scalable unit's capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityFields {
    pub min: String,
    pub max: String,
}

/// Shape and flow rules for one unit kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSpec {
    pub kind: UnitKind,
    /// Top-level key holding the list of units of this kind.
    pub section: String,
    /// Fields merged for each unit, in output order.
    pub fields: Vec<String>,
    /// Fields holding boot scripts; scanned for embedded credentials.
    #[serde(default)]
    pub boot_script_fields: Vec<String>,
    #[serde(default)]
    pub capacity: Option<CapacityFields>,
    /// Dotted path to the unit's conventional inbound port.
    #[serde(default)]
    pub port_field: Option<String>,
    #[serde(default)]
    pub default_port: Option<i64>,
    /// Whether units of this kind may declare dependencies.
    pub origin: bool,
    /// Whether units of this kind may be named as a dependency.
    pub destination: bool,
}

impl KindSpec {
    pub fn is_boot_script(&self, field: &str) -> bool {
        self.boot_script_fields.iter().any(|f| f == field)
    }
}

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    top_level_keys: Vec<String>,
    unit_kinds: Vec<KindSpec>,
}

/// Immutable registry of configuration shape, keyed by unit kind.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    top_level_keys: Vec<String>,
    order: Vec<UnitKind>,
    kinds: BTreeMap<UnitKind, KindSpec>,
}

impl SchemaRegistry {
    /// Registry shipped with the crate.
    pub fn builtin() -> ConfigResult<Self> {
        Self::from_yaml_str(BUILTIN_REGISTRY)
    }

    /// Load a registry document.
    ///
    /// Every [`UnitKind`] must be described exactly once and section names
    /// must be unique and distinct from the top-level keys.
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let document: RegistryDocument = serde_yaml::from_str(content)?;

        let mut order = Vec::new();
        let mut kinds = BTreeMap::new();
        for spec in document.unit_kinds {
            if document.top_level_keys.contains(&spec.section) {
                return Err(ConfigError::InvalidRegistry(format!(
                    "section '{}' collides with a top-level key",
                    spec.section
                )));
            }
            if kinds.values().any(|k: &KindSpec| k.section == spec.section) {
                return Err(ConfigError::InvalidRegistry(format!(
                    "section '{}' is declared twice",
                    spec.section
                )));
            }
            if let Some(capacity) = &spec.capacity {
                for field in [&capacity.min, &capacity.max] {
                    if !spec.fields.contains(field) {
                        return Err(ConfigError::InvalidRegistry(format!(
                            "capacity field '{}' is not a field of {}",
                            field, spec.kind
                        )));
                    }
                }
            }
            let kind = spec.kind;
            if kinds.insert(kind, spec).is_some() {
                return Err(ConfigError::InvalidRegistry(format!(
                    "unit kind '{}' is declared twice",
                    kind
                )));
            }
            order.push(kind);
        }

        if let Some(missing) = UnitKind::all().into_iter().find(|k| !kinds.contains_key(k)) {
            return Err(ConfigError::InvalidRegistry(format!(
                "unit kind '{}' is not declared",
                missing
            )));
        }

        debug!(
            "Loaded registry with {} top-level keys and {} unit kinds",
            document.top_level_keys.len(),
            order.len()
        );

        Ok(Self {
            top_level_keys: document.top_level_keys,
            order,
            kinds,
        })
    }

    pub fn top_level_keys(&self) -> &[String] {
        &self.top_level_keys
    }

    /// Kind specs in declaration order.
    pub fn kinds(&self) -> impl Iterator<Item = &KindSpec> {
        self.order.iter().filter_map(|k| self.kinds.get(k))
    }

    pub fn kind(&self, kind: UnitKind) -> Option<&KindSpec> {
        self.kinds.get(&kind)
    }

    pub fn kind_for_section(&self, section: &str) -> Option<&KindSpec> {
        self.kinds().find(|k| k.section == section)
    }

    /// Whether `key` is a top-level key or a unit section.
    pub fn is_known_key(&self, key: &str) -> bool {
        self.top_level_keys.iter().any(|k| k == key) || self.kind_for_section(key).is_some()
    }
}
