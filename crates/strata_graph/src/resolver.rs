//! Dependency target resolution.
//!
//! A build chooses its [`ReferenceResolver`] once, up front. The local
//! resolver only knows units declared in the same graph; the cross-graph
//! resolver also knows units exported by sibling graphs of a tree and
//! resolves them to imported boundary placeholders.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use strata_config::{SchemaRegistry, UnitKind};

use crate::boundary::{BoundaryId, BoundarySet, Port};
use crate::error::{GraphError, GraphResult};

/// Export name under which `graph` publishes `unit`'s inbound security group.
pub fn export_name(graph: &str, unit: &str) -> String {
    format!("{}-{}-SecurityGroup", graph, unit)
}

/// A unit declared by another graph, as listed under `external_units`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalUnit {
    pub graph: String,
    pub name: String,
    pub kind: UnitKind,
    #[serde(default)]
    pub port: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub graph: String,
    pub kind: UnitKind,
    pub port: Option<Port>,
}

/// Units resolvable through exports, keyed by unit name.
#[derive(Debug, Clone, Default)]
pub struct ExportCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl ExportCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from `external_units` declarations. An omitted port
    /// falls back to the kind's default port.
    pub fn from_external(units: &[ExternalUnit], registry: &SchemaRegistry) -> GraphResult<Self> {
        let mut catalog = Self::new();
        for unit in units {
            let spec = registry.kind(unit.kind).ok_or(GraphError::UnknownKind(unit.kind))?;
            let port = match unit.port {
                Some(port) => Some(Port::from_i64(port).ok_or_else(|| {
                    GraphError::InvalidDependency(format!("{}:{}", unit.name, port))
                })?),
                None => spec.default_port.and_then(Port::from_i64),
            };
            catalog.insert(
                &unit.name,
                CatalogEntry {
                    graph: unit.graph.clone(),
                    kind: unit.kind,
                    port,
                },
            )?;
        }
        Ok(catalog)
    }

    /// Unit names share one namespace across every graph in the catalog.
    pub fn insert(&mut self, name: &str, entry: CatalogEntry) -> GraphResult<()> {
        if self.entries.contains_key(name) {
            return Err(GraphError::DuplicateUnitName {
                kind: entry.kind,
                name: name.to_string(),
            });
        }
        self.entries.insert(name.to_string(), entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.get(name)
    }

}

/// How a dependency target is referenced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceHandle {
    /// Boundary built in this graph.
    Direct(BoundaryId),
    /// Placeholder for a boundary exported by another graph.
    Indirect { boundary: BoundaryId, export: String },
}

impl ReferenceHandle {
    pub fn boundary(&self) -> BoundaryId {
        match self {
            ReferenceHandle::Direct(id) => *id,
            ReferenceHandle::Indirect { boundary, .. } => *boundary,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, ReferenceHandle::Direct(_))
    }
}

/// A unit built in the current graph, as seen by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalUnit {
    pub kind: UnitKind,
    pub inbound: BoundaryId,
    pub port: Option<Port>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub handle: ReferenceHandle,
    pub kind: UnitKind,
    /// The target's conventional inbound port.
    pub port: Option<Port>,
}

#[derive(Debug, Clone)]
pub enum ReferenceResolver {
    Local,
    CrossGraph(ExportCatalog),
}

impl ReferenceResolver {
    pub fn is_cross_graph(&self) -> bool {
        matches!(self, ReferenceResolver::CrossGraph(_))
    }

    /// Resolve `target`, preferring a unit of this graph. Returns `None` when
    /// the target is unknown to this resolver.
    pub fn resolve(
        &self,
        target: &str,
        local: &BTreeMap<String, LocalUnit>,
        boundaries: &mut BoundarySet,
    ) -> Option<Resolution> {
        if let Some(unit) = local.get(target) {
            return Some(Resolution {
                handle: ReferenceHandle::Direct(unit.inbound),
                kind: unit.kind,
                port: unit.port,
            });
        }

        match self {
            ReferenceResolver::Local => None,
            ReferenceResolver::CrossGraph(catalog) => {
                let entry = catalog.get(target)?;
                let export = export_name(&entry.graph, target);
                let boundary = boundaries.import(&format!("{}{}", entry.graph, target), &export);
                debug!("Resolved {} through export {}", target, export);
                Some(Resolution {
                    handle: ReferenceHandle::Indirect { boundary, export },
                    kind: entry.kind,
                    port: entry.port,
                })
            }
        }
    }
}
