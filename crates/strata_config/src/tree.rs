//! Ordered configuration tree.
//!
//! A [`ConfigTree`] is a YAML mapping with string keys whose values are
//! scalars, lists, or nested mappings. Insertion order is preserved, which
//! keeps unit declaration order stable from input to generated template.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Sequence, Value};

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigTree(Mapping);

impl ConfigTree {
    pub fn new() -> Self {
        Self(Mapping::new())
    }

    pub fn from_mapping(mapping: Mapping) -> Self {
        Self(mapping)
    }

    /// Parse a YAML document. An empty document yields an empty tree; any
    /// top-level value other than a mapping is rejected.
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        match serde_yaml::from_str::<Value>(content)? {
            Value::Null => Ok(Self::new()),
            Value::Mapping(mapping) => Ok(Self(mapping)),
            other => Err(ConfigError::InvalidValue {
                key: "<document>".to_string(),
                message: format!("expected a mapping at the top level, found {}", kind_of(&other)),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Look up a dot-separated path such as `loadbalancer.loadbalancer_port`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_mapping()?.get(segment)?;
        }
        Some(current)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_list(&self, key: &str) -> Option<&Sequence> {
        self.get(key).and_then(Value::as_sequence)
    }

    /// Nested mapping under `key`, cloned into its own tree.
    pub fn get_tree(&self, key: &str) -> Option<ConfigTree> {
        self.get(key)
            .and_then(Value::as_mapping)
            .map(|m| ConfigTree(m.clone()))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(Value::String(key.into()), value);
    }

    /// String keys in insertion order. Non-string keys are skipped.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().filter_map(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Mapping(self.0)
    }

    /// Convert to JSON for schema validation. Fails on non-string keys.
    pub fn to_json(&self) -> ConfigResult<serde_json::Value> {
        Ok(serde_json::to_value(&self.0)?)
    }

    /// Deserialize the whole tree into a typed settings struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> ConfigResult<T> {
        Ok(serde_yaml::from_value(Value::Mapping(self.0.clone()))?)
    }
}

impl From<Mapping> for ConfigTree {
    fn from(mapping: Mapping) -> Self {
        Self(mapping)
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
