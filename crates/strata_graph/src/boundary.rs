//! Isolation boundaries and flow synthesis.
//!
//! Each boundary owns one security group. Boundaries live in a
//! [`BoundarySet`] arena and are addressed by [`BoundaryId`]; flows between
//! them are recorded as rules on both ends and rendered to standalone rule
//! resources once the graph is complete.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::error::{GraphError, GraphResult};
use crate::template::{logical_name, Resource, TemplateValue};
use crate::topology::CidrBlock;

pub const SECURITY_GROUP: &str = "AWS::EC2::SecurityGroup";
pub const INGRESS_RULE: &str = "AWS::EC2::SecurityGroupIngress";
pub const EGRESS_RULE: &str = "AWS::EC2::SecurityGroupEgress";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoundaryId(usize);

impl BoundaryId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Where a boundary's security group is defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryOrigin {
    /// Synthesized in this template.
    Local,
    /// Defined by another template and imported under `export`.
    Imported { export: String },
}

/// Port scope of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    Tcp(u16),
    /// All protocols and ports.
    All,
}

impl Port {
    /// `-1` means all traffic; anything else must be a valid TCP port.
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            -1 => Some(Port::All),
            1..=65535 => Some(Port::Tcp(value as u16)),
            _ => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Port::Tcp(port) => port.to_string(),
            Port::All => "All".to_string(),
        }
    }

    pub fn protocol(&self) -> &'static str {
        match self {
            Port::Tcp(_) => "tcp",
            Port::All => "-1",
        }
    }

    pub fn number(&self) -> i64 {
        match self {
            Port::Tcp(port) => i64::from(*port),
            Port::All => -1,
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// The other end of a rule: a boundary in this graph or a raw address block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowPeer {
    Boundary(BoundaryId),
    Cidr(CidrBlock),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ingress,
    Egress,
}

impl Direction {
    fn suffix(&self) -> &'static str {
        match self {
            Direction::Ingress => "Ingress",
            Direction::Egress => "Egress",
        }
    }
}

/// One rule recorded on a boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub direction: Direction,
    pub peer: FlowPeer,
    pub port: Port,
}

/// A boundary-to-boundary flow and the two rules it produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowEdge {
    pub sender: BoundaryId,
    pub receiver: BoundaryId,
    pub port: Port,
}

#[derive(Debug, Clone)]
pub struct IsolationBoundary {
    pub title: String,
    pub origin: BoundaryOrigin,
    ingress: Vec<Rule>,
    egress: Vec<Rule>,
}

impl IsolationBoundary {
    fn new(title: String, origin: BoundaryOrigin) -> Self {
        Self {
            title,
            origin,
            ingress: Vec::new(),
            egress: Vec::new(),
        }
    }

    /// Logical name of the boundary's security group.
    pub fn group_name(&self) -> String {
        format!("{}Sg", self.title)
    }

    /// Handle other resources use to refer to the security group.
    pub fn group_ref(&self) -> TemplateValue {
        match &self.origin {
            BoundaryOrigin::Local => TemplateValue::get_att(self.group_name(), "GroupId"),
            BoundaryOrigin::Imported { export } => TemplateValue::ImportValue(export.clone()),
        }
    }

    pub fn is_local(&self) -> bool {
        self.origin == BoundaryOrigin::Local
    }

    pub fn ingress(&self) -> &[Rule] {
        &self.ingress
    }

    pub fn egress(&self) -> &[Rule] {
        &self.egress
    }
}

/// Arena of every boundary in one graph.
#[derive(Debug, Clone, Default)]
pub struct BoundarySet {
    boundaries: Vec<IsolationBoundary>,
    imports: BTreeMap<String, BoundaryId>,
}

impl BoundarySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a boundary whose security group this graph synthesizes.
    /// Local titles are never renamed. An imported boundary already holding
    /// the same title moves to the next free one.
    pub fn add_local(&mut self, title: &str) -> BoundaryId {
        let title = logical_name(title);
        if let Some(index) = self
            .boundaries
            .iter()
            .position(|b| b.title == title && !b.is_local())
        {
            let renamed = self.free_title(&title);
            debug!("Imported boundary {} renamed to {}", title, renamed);
            self.boundaries[index].title = renamed;
        }
        self.push(IsolationBoundary::new(title, BoundaryOrigin::Local))
    }

    /// Register, or reuse, a placeholder for a security group exported by
    /// another template. The title is made unique within the set, so two
    /// exports whose names flatten alike still get distinct rule names.
    pub fn import(&mut self, title: &str, export: &str) -> BoundaryId {
        if let Some(id) = self.imports.get(export) {
            return *id;
        }
        let title = self.free_title(&logical_name(title));
        let id = self.push(IsolationBoundary::new(
            title,
            BoundaryOrigin::Imported {
                export: export.to_string(),
            },
        ));
        self.imports.insert(export.to_string(), id);
        id
    }

    fn title_taken(&self, title: &str) -> bool {
        self.boundaries.iter().any(|b| b.title == title)
    }

    /// `base`, or `base` followed by the smallest counter from 2 not in use.
    fn free_title(&self, base: &str) -> String {
        if !self.title_taken(base) {
            return base.to_string();
        }
        let mut counter = 2;
        loop {
            let candidate = format!("{}{}", base, counter);
            if !self.title_taken(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }

    fn push(&mut self, boundary: IsolationBoundary) -> BoundaryId {
        let id = BoundaryId(self.boundaries.len());
        self.boundaries.push(boundary);
        id
    }

    pub fn get(&self, id: BoundaryId) -> &IsolationBoundary {
        &self.boundaries[id.0]
    }

    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BoundaryId, &IsolationBoundary)> {
        self.boundaries
            .iter()
            .enumerate()
            .map(|(i, b)| (BoundaryId(i), b))
    }

    /// Allow `sender` to reach `receiver` on `port`: an egress rule on the
    /// sender and an ingress rule on the receiver. Identical flows are not
    /// deduplicated; rendering them collides.
    pub fn create_flow(
        &mut self,
        sender: BoundaryId,
        receiver: BoundaryId,
        port: Port,
    ) -> GraphResult<FlowEdge> {
        if sender == receiver {
            return Err(GraphError::InvalidFlow {
                unit: self.get(sender).title.clone(),
                reason: "a boundary cannot open a flow to itself".to_string(),
            });
        }

        self.boundaries[sender.0].egress.push(Rule {
            direction: Direction::Egress,
            peer: FlowPeer::Boundary(receiver),
            port,
        });
        self.boundaries[receiver.0].ingress.push(Rule {
            direction: Direction::Ingress,
            peer: FlowPeer::Boundary(sender),
            port,
        });

        debug!(
            "Flow {} -> {} on {}",
            self.get(sender).title,
            self.get(receiver).title,
            port
        );
        Ok(FlowEdge {
            sender,
            receiver,
            port,
        })
    }

    /// Allow traffic from `peer` into `receiver`.
    pub fn add_ingress(&mut self, receiver: BoundaryId, peer: FlowPeer, port: Port) {
        self.boundaries[receiver.0].ingress.push(Rule {
            direction: Direction::Ingress,
            peer,
            port,
        });
    }

    /// Allow traffic from `sender` out to `peer`.
    pub fn add_egress(&mut self, sender: BoundaryId, peer: FlowPeer, port: Port) {
        self.boundaries[sender.0].egress.push(Rule {
            direction: Direction::Egress,
            peer,
            port,
        });
    }

    fn peer_title<'a>(&'a self, peer: &'a FlowPeer) -> &'a str {
        match peer {
            FlowPeer::Boundary(id) => &self.get(*id).title,
            FlowPeer::Cidr(block) => &block.name,
        }
    }

    /// Name of a rule from its identity: source, port, destination, port.
    pub fn rule_name(&self, owner: BoundaryId, rule: &Rule) -> String {
        let owner = self.get(owner).title.as_str();
        let peer = logical_name(self.peer_title(&rule.peer));
        let (source, destination) = match rule.direction {
            Direction::Ingress => (peer.as_str(), owner),
            Direction::Egress => (owner, peer.as_str()),
        };
        format!(
            "{}{}To{}{}{}",
            source,
            rule.port.label(),
            destination,
            rule.port.label(),
            rule.direction.suffix()
        )
    }

    /// Every recorded rule as a named rule resource, boundaries in creation
    /// order and ingress before egress within a boundary.
    pub fn rule_resources(&self) -> Vec<(String, Resource)> {
        let mut resources = Vec::new();
        for (id, boundary) in self.iter() {
            for rule in boundary.ingress.iter().chain(boundary.egress.iter()) {
                resources.push((self.rule_name(id, rule), self.render_rule(boundary, rule)));
            }
        }
        resources
    }

    fn render_rule(&self, owner: &IsolationBoundary, rule: &Rule) -> Resource {
        let kind = match rule.direction {
            Direction::Ingress => INGRESS_RULE,
            Direction::Egress => EGRESS_RULE,
        };
        let resource = Resource::new(kind)
            .with("GroupId", owner.group_ref())
            .with("IpProtocol", rule.port.protocol())
            .with("FromPort", rule.port.number())
            .with("ToPort", rule.port.number());

        match (&rule.peer, rule.direction) {
            (FlowPeer::Cidr(block), _) => resource.with("CidrIp", block.cidr.to_string()),
            (FlowPeer::Boundary(peer), Direction::Ingress) => {
                resource.with("SourceSecurityGroupId", self.get(*peer).group_ref())
            }
            (FlowPeer::Boundary(peer), Direction::Egress) => {
                resource.with("DestinationSecurityGroupId", self.get(*peer).group_ref())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_parsing() {
        assert_eq!(Port::from_i64(-1), Some(Port::All));
        assert_eq!(Port::from_i64(443), Some(Port::Tcp(443)));
        assert_eq!(Port::from_i64(0), None);
        assert_eq!(Port::from_i64(70000), None);
        assert_eq!(Port::All.label(), "All");
        assert_eq!(Port::All.protocol(), "-1");
    }

    #[test]
    fn test_create_flow_records_both_ends() {
        let mut set = BoundarySet::new();
        let app = set.add_local("app1Asg");
        let db = set.add_local("db1");

        let edge = set.create_flow(app, db, Port::Tcp(5432)).unwrap();
        assert_eq!(edge.sender, app);

        assert_eq!(set.get(app).egress().len(), 1);
        assert_eq!(set.get(app).ingress().len(), 0);
        assert_eq!(set.get(db).ingress().len(), 1);
        assert_eq!(set.get(db).ingress()[0].peer, FlowPeer::Boundary(app));
    }

    #[test]
    fn test_self_flow_rejected() {
        let mut set = BoundarySet::new();
        let app = set.add_local("app1");
        assert!(matches!(
            set.create_flow(app, app, Port::All),
            Err(GraphError::InvalidFlow { .. })
        ));
    }

    #[test]
    fn test_rule_names_follow_identity_tuple() {
        let mut set = BoundarySet::new();
        let app = set.add_local("app1Asg");
        let db = set.add_local("db1");
        set.create_flow(app, db, Port::Tcp(5432)).unwrap();

        let names: Vec<String> = set.rule_resources().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec!["app1Asg5432Todb15432Egress", "app1Asg5432Todb15432Ingress"]
        );
    }

    #[test]
    fn test_cidr_peer_renders_literal_block() {
        let mut set = BoundarySet::new();
        let jump = set.add_local("Jump");
        let office = CidrBlock::new("Office", "203.0.113.0/24").unwrap();
        set.add_ingress(jump, FlowPeer::Cidr(office), Port::Tcp(22));

        let (name, resource) = set.rule_resources().remove(0);
        assert_eq!(name, "Office22ToJump22Ingress");
        assert_eq!(resource.kind, INGRESS_RULE);
        assert_eq!(
            resource.property("CidrIp"),
            Some(&TemplateValue::Str("203.0.113.0/24".to_string()))
        );
        assert_eq!(resource.property("SourceSecurityGroupId"), None);
    }

    #[test]
    fn test_imported_boundary_is_reused_and_referenced_by_export() {
        let mut set = BoundarySet::new();
        let first = set.import("shared-db1", "shared-db1-SecurityGroup");
        let second = set.import("shared-db1", "shared-db1-SecurityGroup");
        assert_eq!(first, second);
        assert_eq!(set.len(), 1);
        assert_eq!(
            set.get(first).group_ref(),
            TemplateValue::ImportValue("shared-db1-SecurityGroup".to_string())
        );
        assert!(!set.get(first).is_local());
    }

    #[test]
    fn test_imports_flattening_alike_get_distinct_titles() {
        let mut set = BoundarySet::new();
        let first = set.import("shared-db1", "shared-db1-SecurityGroup");
        let second = set.import("sharedd-b1", "sharedd-b1-SecurityGroup");
        assert_ne!(first, second);
        assert_eq!(set.get(first).title, "shareddb1");
        assert_eq!(set.get(second).title, "shareddb12");
    }

    #[test]
    fn test_local_boundary_keeps_its_title_over_an_import() {
        let mut set = BoundarySet::new();
        let imported = set.import("shared-db1", "shared-db1-SecurityGroup");
        let local = set.add_local("shareddb1");
        let app = set.add_local("app1Asg");
        set.create_flow(app, imported, Port::Tcp(5432)).unwrap();
        set.create_flow(app, local, Port::Tcp(5432)).unwrap();

        assert_eq!(set.get(local).title, "shareddb1");
        assert_eq!(set.get(imported).title, "shareddb12");

        let mut names: Vec<String> = set.rule_resources().into_iter().map(|(n, _)| n).collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
    }
}
