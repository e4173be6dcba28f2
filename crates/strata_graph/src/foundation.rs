//! Network foundation: VPC, subnets, routing and the NAT and bastion
//! boundaries every unit relies on.

use serde::Deserialize;
use tracing::info;

use strata_config::ConfigTree;

use crate::boundary::{BoundaryId, FlowPeer, Port};
use crate::error::GraphResult;
use crate::graph::{name_tags, UnitGraph};
use crate::resolver::{export_name, ExternalUnit};
use crate::template::{Output, Resource, TemplateValue};
use crate::topology::{foundation_export, CidrBlock, Topology, TopologyProvider, Visibility, VPC_TITLE};

pub const NAT_TITLE: &str = "Nat";
pub const JUMP_TITLE: &str = "Jump";

const HTTP: Port = Port::Tcp(80);
const HTTPS: Port = Port::Tcp(443);
const SSH: Port = Port::Tcp(22);

/// Graph-wide settings read from the merged configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSettings {
    pub graph_name: String,
    #[serde(default)]
    pub owner: Option<String>,
    pub keypair: String,
    pub availability_zones: Vec<String>,
    pub vpc_cidr: CidrBlock,
    pub public_cidr: CidrBlock,
    #[serde(default)]
    pub home_cidrs: Vec<CidrBlock>,
    pub nat_image_id: String,
    pub nat_instance_type: String,
    pub jump_image_id: String,
    pub jump_instance_type: String,
    /// Set when this graph is a leaf of the named tree.
    #[serde(default)]
    pub tree_name: Option<String>,
    #[serde(default)]
    pub external_units: Vec<ExternalUnit>,
}

impl NetworkSettings {
    pub fn from_config(tree: &ConfigTree) -> GraphResult<Self> {
        Ok(tree.deserialize()?)
    }

    /// The topology this graph places its units into.
    pub fn provider(&self) -> GraphResult<TopologyProvider> {
        match &self.tree_name {
            Some(tree_name) => Ok(TopologyProvider::Imported {
                tree_name: tree_name.clone(),
                zone_count: self.availability_zones.len(),
            }),
            None => Ok(TopologyProvider::Local(Topology::allocate(
                self.vpc_cidr.cidr,
                &self.availability_zones,
            )?)),
        }
    }
}

/// Foundation handles available to unit materializers.
#[derive(Debug, Clone)]
pub struct Network {
    pub nat: BoundaryId,
    pub jump: BoundaryId,
    pub public_cidr: CidrBlock,
    pub keypair: String,
}

/// Synthesize the foundation into `graph`, or import it when the topology
/// belongs to a tree. `export_as` publishes a local foundation under the
/// given tree name.
pub fn synthesize(
    graph: &mut UnitGraph,
    settings: &NetworkSettings,
    provider: &TopologyProvider,
    export_as: Option<&str>,
) -> GraphResult<Network> {
    let (nat, jump) = match provider {
        TopologyProvider::Local(topology) => {
            info!(
                "Synthesizing network {} across {} zones",
                topology.vpc_cidr,
                topology.zones.len()
            );
            synthesize_local(graph, settings, topology, provider, export_as)?
        }
        TopologyProvider::Imported { tree_name, .. } => {
            info!("Importing network foundation of tree {}", tree_name);
            let nat = graph.import_boundary(
                &format!("{}{}", tree_name, NAT_TITLE),
                &export_name(tree_name, NAT_TITLE),
            );
            let jump = graph.import_boundary(
                &format!("{}{}", tree_name, JUMP_TITLE),
                &export_name(tree_name, JUMP_TITLE),
            );
            (nat, jump)
        }
    };

    Ok(Network {
        nat,
        jump,
        public_cidr: settings.public_cidr.clone(),
        keypair: settings.keypair.clone(),
    })
}

fn synthesize_local(
    graph: &mut UnitGraph,
    settings: &NetworkSettings,
    topology: &Topology,
    provider: &TopologyProvider,
    export_as: Option<&str>,
) -> GraphResult<(BoundaryId, BoundaryId)> {
    let vpc = TemplateValue::reference(VPC_TITLE);

    graph.add_resource(
        VPC_TITLE,
        Resource::new("AWS::EC2::VPC")
            .with("CidrBlock", topology.vpc_cidr.to_string())
            .with("EnableDnsSupport", true)
            .with("EnableDnsHostnames", true)
            .with("Tags", name_tags(&settings.graph_name)),
    )?;
    graph.add_resource("InternetGateway", Resource::new("AWS::EC2::InternetGateway"))?;
    graph.add_resource(
        "GatewayAttachment",
        Resource::new("AWS::EC2::VPCGatewayAttachment")
            .with("VpcId", vpc.clone())
            .with("InternetGatewayId", TemplateValue::reference("InternetGateway")),
    )?;

    for visibility in [Visibility::Public, Visibility::Private] {
        graph.add_resource(
            route_table(visibility),
            Resource::new("AWS::EC2::RouteTable").with("VpcId", vpc.clone()),
        )?;
    }
    graph.add_resource(
        "PublicRoute",
        Resource::new("AWS::EC2::Route")
            .with("RouteTableId", TemplateValue::reference(route_table(Visibility::Public)))
            .with("DestinationCidrBlock", settings.public_cidr.cidr.to_string())
            .with("GatewayId", TemplateValue::reference("InternetGateway"))
            .depends_on("GatewayAttachment"),
    )?;

    for subnet in topology.subnets() {
        graph.add_resource(
            subnet.title.clone(),
            Resource::new("AWS::EC2::Subnet")
                .with("AvailabilityZone", subnet.zone.clone())
                .with("CidrBlock", subnet.cidr.to_string())
                .with("MapPublicIpOnLaunch", subnet.visibility == Visibility::Public)
                .with("VpcId", vpc.clone())
                .with("Tags", name_tags(&subnet.title)),
        )?;
        graph.add_resource(
            format!("{}RouteTableAssociation", subnet.title),
            Resource::new("AWS::EC2::SubnetRouteTableAssociation")
                .with("RouteTableId", TemplateValue::reference(route_table(subnet.visibility)))
                .with("SubnetId", TemplateValue::reference(&subnet.title)),
        )?;
    }

    let first_public = provider
        .subnets(Visibility::Public)
        .into_iter()
        .next()
        .unwrap_or_else(|| TemplateValue::reference("PublicSubnet1"));

    let nat = graph.add_boundary(NAT_TITLE, "NAT egress security group")?;
    let nat_group = graph.boundary(nat).group_ref();
    graph.add_resource(
        "NatInstance",
        instance(
            &settings.nat_image_id,
            &settings.nat_instance_type,
            &settings.keypair,
            first_public.clone(),
            nat_group,
        )
        .with("SourceDestCheck", false),
    )?;
    graph.add_resource(
        "PrivateRoute",
        Resource::new("AWS::EC2::Route")
            .with("RouteTableId", TemplateValue::reference(route_table(Visibility::Private)))
            .with("DestinationCidrBlock", settings.public_cidr.cidr.to_string())
            .with("InstanceId", TemplateValue::reference("NatInstance")),
    )?;

    let jump = graph.add_boundary(JUMP_TITLE, "Bastion security group")?;
    let jump_group = graph.boundary(jump).group_ref();
    graph.add_resource(
        "JumpInstance",
        instance(
            &settings.jump_image_id,
            &settings.jump_instance_type,
            &settings.keypair,
            first_public,
            jump_group,
        ),
    )?;

    let public = FlowPeer::Cidr(settings.public_cidr.clone());
    for home in &settings.home_cidrs {
        graph.add_ingress(jump, FlowPeer::Cidr(home.clone()), SSH);
    }
    graph.add_egress(jump, public.clone(), Port::All);
    graph.add_egress(nat, public.clone(), HTTP);
    graph.add_egress(nat, public, HTTPS);

    if let Some(tree_name) = export_as {
        export_foundation(graph, tree_name, topology, nat, jump)?;
    }

    Ok((nat, jump))
}

fn export_foundation(
    graph: &mut UnitGraph,
    tree_name: &str,
    topology: &Topology,
    nat: BoundaryId,
    jump: BoundaryId,
) -> GraphResult<()> {
    graph.add_output(
        VPC_TITLE,
        Output::new("VPC", TemplateValue::reference(VPC_TITLE))
            .exported_as(foundation_export(tree_name, VPC_TITLE)),
    )?;
    for subnet in topology.subnets() {
        graph.add_output(
            subnet.title.clone(),
            Output::new(format!("{} subnet", subnet.zone), TemplateValue::reference(&subnet.title))
                .exported_as(foundation_export(tree_name, &subnet.title)),
        )?;
    }
    for (title, id) in [(NAT_TITLE, nat), (JUMP_TITLE, jump)] {
        let group = graph.boundary(id).group_ref();
        graph.add_output(
            format!("{}SecurityGroup", title),
            Output::new(format!("{} security group", title), group)
                .exported_as(export_name(tree_name, title)),
        )?;
    }
    Ok(())
}

fn route_table(visibility: Visibility) -> String {
    format!("{}RouteTable", visibility.title())
}

fn instance(
    image_id: &str,
    instance_type: &str,
    keypair: &str,
    subnet: TemplateValue,
    group: TemplateValue,
) -> Resource {
    Resource::new("AWS::EC2::Instance")
        .with("ImageId", image_id)
        .with("InstanceType", instance_type)
        .with("KeyName", keypair)
        .with("SubnetId", subnet)
        .with("SecurityGroupIds", TemplateValue::List(vec![group]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{EGRESS_RULE, INGRESS_RULE};

    fn settings(tree_name: Option<&str>) -> NetworkSettings {
        let tree = ConfigTree::from_yaml_str(
            r#"
graph_name: core
keypair: ops
availability_zones: [az1, az2]
vpc_cidr: {name: VPC, cidr: 10.0.0.0/16}
public_cidr: {name: PublicIp, cidr: 0.0.0.0/0}
home_cidrs:
  - {name: Office, cidr: 203.0.113.0/24}
nat_image_id: ami-nat
nat_instance_type: t2.nano
jump_image_id: ami-jump
jump_instance_type: t2.nano
"#,
        )
        .unwrap();
        let mut settings = NetworkSettings::from_config(&tree).unwrap();
        settings.tree_name = tree_name.map(str::to_string);
        settings
    }

    #[test]
    fn test_local_foundation_resources_and_rules() {
        let settings = settings(None);
        let provider = settings.provider().unwrap();
        let mut graph = UnitGraph::new("core", provider.vpc());
        synthesize(&mut graph, &settings, &provider, None).unwrap();
        let template = graph.finish().unwrap();

        for name in ["Vpc", "PublicSubnet1", "PrivateSubnet2", "NatSg", "JumpSg", "PrivateRoute"] {
            assert!(template.resource(name).is_some(), "missing {}", name);
        }
        assert_eq!(
            template.resource("PrivateSubnet2").unwrap().property("CidrBlock"),
            Some(&TemplateValue::Str("10.0.101.0/24".to_string()))
        );
        assert_eq!(
            template.resource("Office22ToJump22Ingress").map(|r| r.kind.as_str()),
            Some(INGRESS_RULE)
        );
        assert_eq!(
            template.resource("JumpAllToPublicIpAllEgress").map(|r| r.kind.as_str()),
            Some(EGRESS_RULE)
        );
        assert!(template.resource("Nat443ToPublicIp443Egress").is_some());
        assert!(template.outputs.is_empty());
    }

    #[test]
    fn test_exported_foundation_publishes_tree_names() {
        let settings = settings(None);
        let provider = settings.provider().unwrap();
        let mut graph = UnitGraph::new("core", provider.vpc());
        synthesize(&mut graph, &settings, &provider, Some("core")).unwrap();
        let template = graph.finish().unwrap();

        let exports = template.export_names();
        for name in [
            "core-Vpc",
            "core-PublicSubnet1",
            "core-PrivateSubnet2",
            "core-Nat-SecurityGroup",
            "core-Jump-SecurityGroup",
        ] {
            assert!(exports.contains(&name), "missing export {}", name);
        }
    }

    #[test]
    fn test_imported_foundation_synthesizes_nothing() {
        let settings = settings(Some("core"));
        let provider = settings.provider().unwrap();
        let mut graph = UnitGraph::new("leaf", provider.vpc());
        let network = synthesize(&mut graph, &settings, &provider, None).unwrap();

        assert_eq!(
            graph.boundary(network.nat).group_ref(),
            TemplateValue::ImportValue("core-Nat-SecurityGroup".to_string())
        );
        assert!(graph.finish().unwrap().resources.is_empty());
    }
}
