//! # strata_config
//!
//! Layered configuration for strata: user values merged over environment
//! defaults, validated against a JSON Schema and checked for invariants the
//! schema cannot express.
//!
//! ## Features
//!
//! - **ConfigTree**: ordered YAML mapping shared by every stage
//! - **SchemaRegistry**: data-driven description of unit kinds and their fields
//! - **ConfigMerger**: per-key and per-unit-field overlay of user over defaults
//! - **SecretScanner**: credential detection in boot scripts
//! - **ConfigValidator**: JSON Schema plus capacity and secret checks
//!
//! ## Example
//!
//! ```rust,no_run
//! use strata_config::{ConfigLoader, ConfigMerger, ConfigValidator, SchemaRegistry};
//!
//! let registry = SchemaRegistry::builtin().unwrap();
//! let user = ConfigLoader::read_tree("stack.yaml").unwrap();
//! let defaults = ConfigLoader::builtin_defaults().unwrap();
//! let schema = ConfigLoader::builtin_schema().unwrap();
//!
//! let united = ConfigMerger::new(&registry).unwrap().merge(&user, &defaults).unwrap();
//! ConfigValidator::new(&registry, &schema).unwrap().validate(&united).unwrap();
//! ```

pub mod error;
pub mod loader;
pub mod merger;
pub mod registry;
pub mod secrets;
pub mod tree;
pub mod validator;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use merger::ConfigMerger;
pub use registry::{CapacityFields, KindSpec, SchemaRegistry, UnitKind};
pub use secrets::{CredentialClass, SecretScanner};
pub use tree::ConfigTree;
pub use validator::{count_units, ConfigValidator, ValidationResult};
