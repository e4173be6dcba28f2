//! Layered configuration merging.
//!
//! User values are laid over environment defaults key by key. Top-level keys
//! come from the registry; for every unit section present as a list in the
//! user tree, each unit's fields are resolved against the flat default of the
//! same field name; mapping fields such as `loadbalancer` are merged one key
//! deep. Boot script fields are scanned for credentials and
//! capacity bounds are checked while merging, so a leak or an inverted range
//! aborts before validation ever runs.

use serde_yaml::{Mapping, Sequence, Value};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::registry::{CapacityFields, KindSpec, SchemaRegistry};
use crate::secrets::SecretScanner;
use crate::tree::ConfigTree;

/// Merges user configuration over defaults using a [`SchemaRegistry`].
pub struct ConfigMerger<'a> {
    registry: &'a SchemaRegistry,
    scanner: SecretScanner,
}

impl<'a> ConfigMerger<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> ConfigResult<Self> {
        Ok(Self {
            registry,
            scanner: SecretScanner::new()?,
        })
    }

    /// Produce the united configuration tree.
    ///
    /// Keys missing from both inputs are left out; schema validation reports
    /// them. Unit sections that are absent become empty lists, and sections
    /// that are not lists are copied through untouched for the schema to
    /// reject.
    pub fn merge(&self, user: &ConfigTree, defaults: &ConfigTree) -> ConfigResult<ConfigTree> {
        info!("Merging configuration ({} user keys over {} defaults)", user.len(), defaults.len());

        for key in user.keys() {
            if !self.registry.is_known_key(key) {
                warn!("Dropping unrecognised configuration key '{}'", key);
            }
        }

        let mut united = ConfigTree::new();

        for key in self.registry.top_level_keys() {
            if let Some(value) = user.get(key).or_else(|| defaults.get(key)) {
                united.insert(key.clone(), value.clone());
            }
        }

        for spec in self.registry.kinds() {
            let merged = match user.get(&spec.section) {
                None | Some(Value::Null) => Value::Sequence(Sequence::new()),
                Some(Value::Sequence(units)) => {
                    Value::Sequence(self.merge_section(spec, units, defaults)?)
                }
                Some(other) => other.clone(),
            };
            united.insert(spec.section.clone(), merged);
        }

        Ok(united)
    }

    fn merge_section(
        &self,
        spec: &KindSpec,
        units: &Sequence,
        defaults: &ConfigTree,
    ) -> ConfigResult<Sequence> {
        let mut merged_units = Sequence::with_capacity(units.len());

        for (index, unit) in units.iter().enumerate() {
            let Some(unit_map) = unit.as_mapping() else {
                merged_units.push(unit.clone());
                continue;
            };
            let label = unit_label(spec, index, unit_map);

            for key in unit_map.keys().filter_map(Value::as_str) {
                if !spec.fields.iter().any(|f| f == key) {
                    warn!("Ignoring unrecognised field '{}' on unit '{}'", key, label);
                }
            }

            let mut merged = ConfigTree::new();
            for field in &spec.fields {
                let value = match (unit_map.get(field.as_str()), defaults.get(field)) {
                    (Some(user), default) => Some(overlay(user, default)),
                    (None, default) => default.cloned(),
                };
                if let Some(value) = value {
                    if spec.is_boot_script(field) {
                        self.scanner.check(&label, field, &value)?;
                    }
                    merged.insert(field.clone(), value);
                }
            }

            if let Some(capacity) = &spec.capacity {
                check_capacity(&label, &merged, capacity)?;
            }

            debug!("Merged {} unit '{}'", spec.kind, label);
            merged_units.push(merged.into_value());
        }

        Ok(merged_units)
    }
}

/// A user mapping is laid over a default mapping one key deep, so a partial
/// block such as `loadbalancer` keeps its remaining defaults. Any other user
/// value replaces the default outright.
fn overlay(user: &Value, default: Option<&Value>) -> Value {
    match (user, default) {
        (Value::Mapping(user), Some(Value::Mapping(default))) => {
            let mut merged = default.clone();
            for (key, value) in user {
                merged.insert(key.clone(), value.clone());
            }
            Value::Mapping(merged)
        }
        _ => user.clone(),
    }
}

/// Reject a unit whose resolved minimum capacity exceeds its maximum.
///
/// Non-integer bounds are left to schema validation.
pub fn check_capacity(unit: &str, tree: &ConfigTree, fields: &CapacityFields) -> ConfigResult<()> {
    if let (Some(min), Some(max)) = (tree.get_i64(&fields.min), tree.get_i64(&fields.max)) {
        if min > max {
            return Err(ConfigError::CapacityRange {
                unit: unit.to_string(),
                min,
                max,
            });
        }
    }
    Ok(())
}

/// Human-readable name for a unit in error messages.
pub fn unit_label(spec: &KindSpec, index: usize, unit: &Mapping) -> String {
    unit.get("unit_title")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}[{}]", spec.section, index))
}
