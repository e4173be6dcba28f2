//! The in-progress graph of one build.

use std::collections::BTreeMap;

use crate::boundary::{
    BoundaryId, BoundarySet, FlowEdge, FlowPeer, IsolationBoundary, Port, SECURITY_GROUP,
};
use crate::error::GraphResult;
use crate::resolver::{LocalUnit, ReferenceResolver, Resolution};
use crate::template::{logical_name, Output, Resource, Template, TemplateValue};

/// Boundaries, unit registrations and template resources of one build.
///
/// Security groups are inserted into the template as soon as their boundary
/// is added, so a name collision surfaces at the point it is introduced.
/// Rule resources are rendered by [`UnitGraph::finish`].
#[derive(Debug)]
pub struct UnitGraph {
    name: String,
    vpc: TemplateValue,
    boundaries: BoundarySet,
    template: Template,
    units: BTreeMap<String, LocalUnit>,
}

impl UnitGraph {
    pub fn new(name: impl Into<String>, vpc: TemplateValue) -> Self {
        let name = name.into();
        Self {
            template: Template::new(format!("strata graph {}", name)),
            name,
            vpc,
            boundaries: BoundarySet::new(),
            units: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vpc(&self) -> &TemplateValue {
        &self.vpc
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn add_resource(&mut self, name: impl Into<String>, resource: Resource) -> GraphResult<()> {
        self.template.add_resource(name, resource)
    }

    pub fn add_output(&mut self, name: impl Into<String>, output: Output) -> GraphResult<()> {
        self.template.add_output(name, output)
    }

    /// Add a local boundary and its security group.
    pub fn add_boundary(&mut self, title: &str, description: &str) -> GraphResult<BoundaryId> {
        let title = logical_name(title);
        let group = Resource::new(SECURITY_GROUP)
            .with("GroupDescription", description)
            .with("VpcId", self.vpc.clone())
            .with("Tags", name_tags(&title));
        self.template.add_resource(format!("{}Sg", title), group)?;
        Ok(self.boundaries.add_local(&title))
    }

    pub fn import_boundary(&mut self, title: &str, export: &str) -> BoundaryId {
        self.boundaries.import(title, export)
    }

    pub fn boundary(&self, id: BoundaryId) -> &IsolationBoundary {
        self.boundaries.get(id)
    }

    pub fn boundaries(&self) -> &BoundarySet {
        &self.boundaries
    }

    pub fn create_flow(&mut self, sender: BoundaryId, receiver: BoundaryId, port: Port) -> GraphResult<FlowEdge> {
        self.boundaries.create_flow(sender, receiver, port)
    }

    pub fn add_ingress(&mut self, receiver: BoundaryId, peer: FlowPeer, port: Port) {
        self.boundaries.add_ingress(receiver, peer, port)
    }

    pub fn add_egress(&mut self, sender: BoundaryId, peer: FlowPeer, port: Port) {
        self.boundaries.add_egress(sender, peer, port)
    }

    pub fn register_unit(&mut self, name: &str, unit: LocalUnit) {
        self.units.insert(name.to_string(), unit);
    }

    pub fn units(&self) -> &BTreeMap<String, LocalUnit> {
        &self.units
    }

    pub fn resolve(&mut self, resolver: &ReferenceResolver, target: &str) -> Option<Resolution> {
        resolver.resolve(target, &self.units, &mut self.boundaries)
    }

    /// Render every recorded rule and hand back the finished template.
    pub fn finish(mut self) -> GraphResult<Template> {
        for (name, resource) in self.boundaries.rule_resources() {
            self.template.add_resource(name, resource)?;
        }
        Ok(self.template)
    }
}

/// `Tags` property carrying a `Name` tag.
pub fn name_tags(name: &str) -> TemplateValue {
    TemplateValue::List(vec![TemplateValue::map([("Key", name), ("Value", name)])])
}
