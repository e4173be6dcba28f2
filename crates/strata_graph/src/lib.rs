//! # strata_graph
//!
//! Unit composition and security-flow synthesis for strata.
//!
//! This crate turns a validated configuration into a provisioning template:
//! it allocates subnets, builds one isolation boundary per unit, derives
//! ingress and egress rules from declared dependencies, and resolves
//! dependencies on units owned by other graphs through exports.
//!
//! ## Features
//!
//! - Deterministic subnet allocation across availability zones
//! - Isolation boundaries with paired ingress/egress flow synthesis
//! - Local and cross-graph reference resolution
//! - Tree builds: one shared network foundation plus cross-referencing leaves
//! - JSON and YAML template emission
//!
//! ## Example
//!
//! ```rust,no_run
//! use strata_config::ConfigLoader;
//! use strata_graph::{Generator, GeneratorInputs, OutputFormat, TemplateEmitter};
//!
//! let user = ConfigLoader::read_tree("stack.yaml").unwrap();
//! let inputs = GeneratorInputs::with_builtins(user).unwrap();
//!
//! let template = Generator::builtin().unwrap().generate(&inputs).unwrap();
//! println!("{}", TemplateEmitter::emit(&template, OutputFormat::Json).unwrap());
//! ```

pub mod boundary;
pub mod builder;
pub mod error;
pub mod foundation;
pub mod generator;
pub mod graph;
pub mod materialize;
pub mod resolver;
pub mod template;
pub mod topology;
pub mod unit;

pub use boundary::{BoundaryId, BoundaryOrigin, BoundarySet, FlowEdge, FlowPeer, IsolationBoundary, Port, Rule};
pub use builder::UnitGraphBuilder;
pub use error::{GraphError, GraphResult};
pub use foundation::{Network, NetworkSettings};
pub use generator::{Generator, GeneratorInputs, LeafInput, PreparedGraph, TreeGenerator, TreeInputs, TreeOutput};
pub use graph::UnitGraph;
pub use materialize::{BuildContext, StandardMaterializer, UnitBoundaries, UnitMaterializer};
pub use resolver::{export_name, CatalogEntry, ExportCatalog, ExternalUnit, ReferenceHandle, ReferenceResolver, Resolution};
pub use template::{OutputFormat, Resource, Template, TemplateEmitter, TemplateValue};
pub use topology::{AddressAllocator, CidrBlock, Ipv4Cidr, Topology, TopologyProvider, Visibility};
pub use unit::{Dependency, UnitDescriptor};
