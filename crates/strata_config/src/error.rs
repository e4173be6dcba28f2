//! Error types for the configuration module.

use std::path::PathBuf;
use thiserror::Error;

use crate::secrets::CredentialClass;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading, merging or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Schema validation failed: {}", .paths.join("; "))]
    Schema { paths: Vec<String> },

    #[error("Secret leak in {unit}.{field}: value resembles a credential ({class})")]
    SecretLeak {
        unit: String,
        field: String,
        class: CredentialClass,
    },

    #[error("Capacity range invalid for unit '{unit}': minsize {min} exceeds maxsize {max}")]
    CapacityRange { unit: String, min: i64, max: i64 },

    #[error("Invalid schema document: {0}")]
    InvalidSchema(String),

    #[error("Invalid credential pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid registry: {0}")]
    InvalidRegistry(String),

    #[error("Invalid configuration format in {path}: {message}")]
    InvalidFormat { path: PathBuf, message: String },

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON conversion error: {0}")]
    Json(#[from] serde_json::Error),
}
