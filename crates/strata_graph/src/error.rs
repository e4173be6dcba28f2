//! Error types for graph construction.

use thiserror::Error;

use strata_config::{ConfigError, UnitKind};

use crate::topology::Visibility;

/// Result type alias for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors that can occur while building a unit graph or emitting its template.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Duplicate unit name: {kind} unit '{name}' is already declared")]
    DuplicateUnitName { kind: UnitKind, name: String },

    #[error("Unknown dependency: unit '{unit}' depends on '{dependency}', which is neither declared nor exported")]
    UnknownDependency { unit: String, dependency: String },

    #[error("Invalid flow from unit '{unit}': {reason}")]
    InvalidFlow { unit: String, reason: String },

    #[error("Resource name collision: '{0}' is synthesized twice")]
    ResourceNameCollision(String),

    #[error("Invalid dependency '{0}': expected <name> or <name>:<port>")]
    InvalidDependency(String),

    #[error("Invalid CIDR block: {0}")]
    InvalidCidr(String),

    #[error("Address space exhausted for {0} subnets")]
    AddressSpaceExhausted(Visibility),

    #[error("Unknown unit kind: {0}")]
    UnknownKind(UnitKind),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
