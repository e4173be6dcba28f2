//! Unit graph construction.
//!
//! A build runs in three passes over the declared units:
//!
//! 1. names are checked for duplicates before anything is synthesized;
//! 2. each unit is materialized and registered under its name;
//! 3. each dependency is resolved and wired as a flow from the declaring
//!    unit's outbound boundary to the target's inbound boundary.

use std::collections::BTreeSet;

use tracing::{debug, info};

use strata_config::{SchemaRegistry, UnitKind};

use crate::error::{GraphError, GraphResult};
use crate::foundation::{synthesize, NetworkSettings};
use crate::graph::UnitGraph;
use crate::materialize::{BuildContext, StandardMaterializer, UnitBoundaries, UnitMaterializer};
use crate::resolver::{export_name, LocalUnit, ReferenceResolver};
use crate::template::{logical_name, Output, Template};
use crate::topology::TopologyProvider;
use crate::unit::{conventional_port, UnitDescriptor};

static STANDARD: StandardMaterializer = StandardMaterializer;

/// Builds one graph's template from validated unit descriptors.
pub struct UnitGraphBuilder<'a> {
    registry: &'a SchemaRegistry,
    resolver: ReferenceResolver,
    materializer: &'a dyn UnitMaterializer,
}

impl<'a> UnitGraphBuilder<'a> {
    pub fn new(registry: &'a SchemaRegistry, resolver: ReferenceResolver) -> Self {
        Self {
            registry,
            resolver,
            materializer: &STANDARD,
        }
    }

    pub fn with_materializer(mut self, materializer: &'a dyn UnitMaterializer) -> Self {
        self.materializer = materializer;
        self
    }

    /// Build the graph. `export_as` publishes a locally owned foundation
    /// under that tree name.
    pub fn build(
        &self,
        units: &[UnitDescriptor],
        settings: &NetworkSettings,
        provider: &TopologyProvider,
        export_as: Option<&str>,
    ) -> GraphResult<Template> {
        info!(
            "Building graph {} with {} units ({} references)",
            settings.graph_name,
            units.len(),
            if self.resolver.is_cross_graph() { "cross-graph" } else { "local" }
        );

        check_unique_names(units)?;

        let mut graph = UnitGraph::new(&settings.graph_name, provider.vpc());
        let network = synthesize(&mut graph, settings, provider, export_as)?;
        let ctx = BuildContext {
            settings,
            provider,
            network: &network,
        };

        let mut built = Vec::with_capacity(units.len());
        for unit in units {
            let spec = self.registry.kind(unit.kind).ok_or(GraphError::UnknownKind(unit.kind))?;
            let boundaries = self.materializer.materialize(unit, &mut graph, &ctx)?;
            graph.register_unit(
                &unit.name,
                LocalUnit {
                    kind: unit.kind,
                    inbound: boundaries.inbound,
                    port: conventional_port(spec, &unit.config),
                },
            );
            built.push(boundaries);
        }

        for (unit, boundaries) in units.iter().zip(&built) {
            self.wire_dependencies(unit, *boundaries, &mut graph)?;
        }

        if self.resolver.is_cross_graph() {
            export_units(&mut graph, units, &built)?;
        }

        graph.finish()
    }

    fn wire_dependencies(
        &self,
        unit: &UnitDescriptor,
        boundaries: UnitBoundaries,
        graph: &mut UnitGraph,
    ) -> GraphResult<()> {
        if unit.dependencies.is_empty() {
            return Ok(());
        }

        let spec = self.registry.kind(unit.kind).ok_or(GraphError::UnknownKind(unit.kind))?;
        if !spec.origin {
            return Err(GraphError::InvalidFlow {
                unit: unit.name.clone(),
                reason: format!("{} units cannot declare dependencies", unit.kind),
            });
        }

        for dependency in &unit.dependencies {
            if dependency.target == unit.name {
                return Err(GraphError::InvalidFlow {
                    unit: unit.name.clone(),
                    reason: "a unit cannot depend on itself".to_string(),
                });
            }

            let resolution = graph.resolve(&self.resolver, &dependency.target).ok_or_else(|| {
                GraphError::UnknownDependency {
                    unit: unit.name.clone(),
                    dependency: dependency.target.clone(),
                }
            })?;

            let target = self
                .registry
                .kind(resolution.kind)
                .ok_or(GraphError::UnknownKind(resolution.kind))?;
            if !target.destination {
                return Err(GraphError::InvalidFlow {
                    unit: unit.name.clone(),
                    reason: format!(
                        "'{}' is a {} unit and cannot receive flows",
                        dependency.target, resolution.kind
                    ),
                });
            }

            let port = dependency.port.or(resolution.port).ok_or_else(|| GraphError::InvalidFlow {
                unit: unit.name.clone(),
                reason: format!("no port given for '{}' and its kind has none", dependency.target),
            })?;

            debug!(
                "Wiring {} -> {} on {} ({})",
                unit.name,
                dependency.target,
                port,
                if resolution.handle.is_direct() { "direct" } else { "import" }
            );
            graph.create_flow(boundaries.outbound, resolution.handle.boundary(), port)?;
        }

        Ok(())
    }
}

/// One namespace per graph: a name may not repeat even across kinds.
fn check_unique_names(units: &[UnitDescriptor]) -> GraphResult<()> {
    let mut seen = BTreeSet::new();
    for unit in units {
        if !seen.insert(unit.name.as_str()) {
            return Err(duplicate(unit.kind, &unit.name));
        }
    }
    Ok(())
}

fn duplicate(kind: UnitKind, name: &str) -> GraphError {
    GraphError::DuplicateUnitName {
        kind,
        name: name.to_string(),
    }
}

fn export_units(graph: &mut UnitGraph, units: &[UnitDescriptor], built: &[UnitBoundaries]) -> GraphResult<()> {
    for (unit, boundaries) in units.iter().zip(built) {
        let export = export_name(graph.name(), &unit.name);
        let group = graph.boundary(boundaries.inbound).group_ref();
        graph.add_output(
            format!("{}SecurityGroup", logical_name(&unit.name)),
            Output::new(format!("{} inbound security group", unit.name), group).exported_as(export),
        )?;
    }
    Ok(())
}
