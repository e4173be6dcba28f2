//! Provisioning template model and emission.
//!
//! A [`Template`] holds resources and outputs in sorted maps so that two
//! builds over the same input serialize byte for byte identically.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info};

use crate::error::{GraphError, GraphResult};

/// Template format version understood by the provisioning engine.
pub const FORMAT_VERSION: &str = "2010-09-09";

/// A property value in a generated template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateValue {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<TemplateValue>),
    Map(BTreeMap<String, TemplateValue>),
    /// Reference to another resource in the same template.
    Ref(String),
    /// Attribute of another resource in the same template.
    GetAtt(String, String),
    /// Value exported by a separately deployed template.
    ImportValue(String),
}

impl TemplateValue {
    pub fn reference(name: impl Into<String>) -> Self {
        TemplateValue::Ref(name.into())
    }

    pub fn get_att(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        TemplateValue::GetAtt(resource.into(), attribute.into())
    }

    pub fn base64(value: impl Into<TemplateValue>) -> Self {
        let mut map = BTreeMap::new();
        map.insert("Fn::Base64".to_string(), value.into());
        TemplateValue::Map(map)
    }

    /// Build a map from `(key, value)` pairs.
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<TemplateValue>,
    {
        TemplateValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TemplateValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TemplateValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl Serialize for TemplateValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TemplateValue::Str(s) => serializer.serialize_str(s),
            TemplateValue::Int(i) => serializer.serialize_i64(*i),
            TemplateValue::Bool(b) => serializer.serialize_bool(*b),
            TemplateValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            TemplateValue::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            TemplateValue::Ref(name) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Ref", name)?;
                map.end()
            }
            TemplateValue::GetAtt(resource, attribute) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Fn::GetAtt", &[resource, attribute])?;
                map.end()
            }
            TemplateValue::ImportValue(name) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Fn::ImportValue", name)?;
                map.end()
            }
        }
    }
}

impl From<&str> for TemplateValue {
    fn from(value: &str) -> Self {
        TemplateValue::Str(value.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(value: String) -> Self {
        TemplateValue::Str(value)
    }
}

impl From<&String> for TemplateValue {
    fn from(value: &String) -> Self {
        TemplateValue::Str(value.clone())
    }
}

impl From<i64> for TemplateValue {
    fn from(value: i64) -> Self {
        TemplateValue::Int(value)
    }
}

impl From<bool> for TemplateValue {
    fn from(value: bool) -> Self {
        TemplateValue::Bool(value)
    }
}

impl<T: Into<TemplateValue>> From<Vec<T>> for TemplateValue {
    fn from(values: Vec<T>) -> Self {
        TemplateValue::List(values.into_iter().map(Into::into).collect())
    }
}

/// One resource definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Properties", skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, TemplateValue>,
    #[serde(rename = "DependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Resource {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            properties: BTreeMap::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<TemplateValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Set `key` only when `value` is present.
    pub fn with_opt(self, key: impl Into<String>, value: Option<impl Into<TemplateValue>>) -> Self {
        match value {
            Some(value) => self.with(key, value),
            None => self,
        }
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&TemplateValue> {
        self.properties.get(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportName {
    #[serde(rename = "Name")]
    pub name: String,
}

/// A template output, optionally exported for other templates to import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub description: String,
    pub value: TemplateValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportName>,
}

impl Output {
    pub fn new(description: impl Into<String>, value: TemplateValue) -> Self {
        Self {
            description: description.into(),
            value,
            export: None,
        }
    }

    pub fn exported_as(mut self, name: impl Into<String>) -> Self {
        self.export = Some(ExportName { name: name.into() });
        self
    }
}

/// A complete provisioning template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, Resource>,
    #[serde(rename = "Outputs", skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

impl Template {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            description: description.into(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Insert a resource. An existing resource with the same logical name is
    /// a collision.
    pub fn add_resource(&mut self, name: impl Into<String>, resource: Resource) -> GraphResult<()> {
        let name = name.into();
        if self.resources.contains_key(&name) {
            return Err(GraphError::ResourceNameCollision(name));
        }
        debug!("Adding resource {} ({})", name, resource.kind);
        self.resources.insert(name, resource);
        Ok(())
    }

    pub fn add_output(&mut self, name: impl Into<String>, output: Output) -> GraphResult<()> {
        let name = name.into();
        if self.outputs.contains_key(&name) {
            return Err(GraphError::ResourceNameCollision(name));
        }
        self.outputs.insert(name, output);
        Ok(())
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.get(name)
    }

    pub fn resources_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = (&'a String, &'a Resource)> {
        self.resources.iter().filter(move |(_, r)| r.kind == kind)
    }

    /// Names of every export this template publishes.
    pub fn export_names(&self) -> Vec<&str> {
        self.outputs
            .values()
            .filter_map(|o| o.export.as_ref().map(|e| e.name.as_str()))
            .collect()
    }
}

/// Wire format of an emitted template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Yaml => "yaml",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            other => Err(format!("unsupported output format '{}'", other)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Serializes templates to their wire format.
pub struct TemplateEmitter;

impl TemplateEmitter {
    pub fn emit(template: &Template, format: OutputFormat) -> GraphResult<String> {
        let rendered = match format {
            OutputFormat::Json => {
                let mut json = serde_json::to_string_pretty(template)?;
                json.push('\n');
                json
            }
            OutputFormat::Yaml => serde_yaml::to_string(template)?,
        };
        info!(
            "Emitted {} template with {} resources and {} outputs",
            format,
            template.resources.len(),
            template.outputs.len()
        );
        Ok(rendered)
    }

    /// Emit `template` to `path`, creating parent directories.
    pub fn write(template: &Template, format: OutputFormat, path: &Path) -> GraphResult<()> {
        let rendered = Self::emit(template, format)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, rendered)?;
        debug!("Wrote template to {:?}", path);
        Ok(())
    }
}

/// Logical resource name for a title: its ASCII alphanumeric characters.
pub fn logical_name(title: &str) -> String {
    title.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}
