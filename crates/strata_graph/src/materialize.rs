//! Per-kind unit materialization.
//!
//! A [`UnitMaterializer`] turns one validated unit into its concrete
//! resources and returns the boundaries that dependency flows attach to.
//! The same materializer serves standalone and leaf graphs; the difference
//! is carried entirely by the [`BuildContext`]'s topology provider.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use strata_config::UnitKind;

use crate::boundary::{BoundaryId, FlowPeer, Port};
use crate::error::{GraphError, GraphResult};
use crate::foundation::{Network, NetworkSettings};
use crate::graph::{name_tags, UnitGraph};
use crate::template::{Resource, TemplateValue};
use crate::topology::{TopologyProvider, Visibility};
use crate::unit::UnitDescriptor;

/// Boundaries a unit exposes to dependency wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitBoundaries {
    /// Receives flows from units that depend on this one.
    pub inbound: BoundaryId,
    /// Sends flows to this unit's own dependencies.
    pub outbound: BoundaryId,
}

impl UnitBoundaries {
    pub fn single(id: BoundaryId) -> Self {
        Self {
            inbound: id,
            outbound: id,
        }
    }
}

/// Everything a materializer may read while building one unit.
pub struct BuildContext<'a> {
    pub settings: &'a NetworkSettings,
    pub provider: &'a TopologyProvider,
    pub network: &'a Network,
}

pub trait UnitMaterializer {
    fn materialize(
        &self,
        unit: &UnitDescriptor,
        graph: &mut UnitGraph,
        ctx: &BuildContext<'_>,
    ) -> GraphResult<UnitBoundaries>;
}

/// Materializer for every built-in unit kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardMaterializer;

impl UnitMaterializer for StandardMaterializer {
    fn materialize(
        &self,
        unit: &UnitDescriptor,
        graph: &mut UnitGraph,
        ctx: &BuildContext<'_>,
    ) -> GraphResult<UnitBoundaries> {
        debug!("Materializing {} unit {}", unit.kind, unit.name);
        match unit.kind {
            UnitKind::ComputePool => compute_pool(&unit.name, &typed(unit)?, graph, ctx),
            UnitKind::Database => database(&unit.name, &typed(unit)?, graph, ctx),
            UnitKind::Function => function(&unit.name, &typed(unit)?, graph, ctx),
            UnitKind::Gateway => gateway(&unit.name, &typed(unit)?, graph),
            UnitKind::Distribution => distribution(&unit.name, &typed(unit)?, graph),
        }
    }
}

fn typed<T: DeserializeOwned>(unit: &UnitDescriptor) -> GraphResult<T> {
    Ok(unit.config.deserialize()?)
}

fn port(unit: &str, value: i64) -> GraphResult<Port> {
    Port::from_i64(value).ok_or_else(|| GraphError::InvalidFlow {
        unit: unit.to_string(),
        reason: format!("{} is not a valid port", value),
    })
}

#[derive(Debug, Clone, Deserialize)]
struct LoadBalancerConfig {
    protocol: String,
    instance_port: i64,
    loadbalancer_port: i64,
    #[serde(default)]
    health_check_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ComputePoolConfig {
    #[serde(default)]
    public_unit: bool,
    minsize: i64,
    maxsize: i64,
    image_id: String,
    instance_type: String,
    #[serde(default)]
    userdata: String,
    #[serde(default)]
    health_check_grace_period: Option<i64>,
    loadbalancer: LoadBalancerConfig,
}

/// Load balancer in front of an autoscaling group. Dependants reach the
/// load balancer; the group's instances reach the unit's dependencies.
fn compute_pool(
    name: &str,
    config: &ComputePoolConfig,
    graph: &mut UnitGraph,
    ctx: &BuildContext<'_>,
) -> GraphResult<UnitBoundaries> {
    let elb_title = format!("{}Elb", name);
    let asg_title = format!("{}Asg", name);
    let lc_title = format!("{}Lc", name);
    let lb = &config.loadbalancer;
    let listener_port = port(name, lb.loadbalancer_port)?;
    let instance_port = port(name, lb.instance_port)?;

    let elb = graph.add_boundary(&elb_title, &format!("{} load balancer security group", name))?;
    let asg = graph.add_boundary(&asg_title, &format!("{} instance security group", name))?;
    let elb_group = graph.boundary(elb).group_ref();
    let asg_group = graph.boundary(asg).group_ref();

    let (scheme, lb_subnets) = if config.public_unit {
        ("internet-facing", ctx.provider.subnets(Visibility::Public))
    } else {
        ("internal", ctx.provider.subnets(Visibility::Private))
    };
    let health_target = match &lb.health_check_path {
        Some(path) if lb.protocol.starts_with("HTTP") => {
            format!("{}:{}{}", lb.protocol, lb.instance_port, path)
        }
        _ => format!("TCP:{}", lb.instance_port),
    };

    graph.add_resource(
        elb_title.clone(),
        Resource::new("AWS::ElasticLoadBalancing::LoadBalancer")
            .with("Scheme", scheme)
            .with("Subnets", lb_subnets)
            .with("SecurityGroups", vec![elb_group])
            .with(
                "Listeners",
                TemplateValue::List(vec![TemplateValue::map([
                    ("LoadBalancerPort", TemplateValue::Str(lb.loadbalancer_port.to_string())),
                    ("InstancePort", TemplateValue::Str(lb.instance_port.to_string())),
                    ("Protocol", TemplateValue::from(&lb.protocol)),
                ])]),
            )
            .with(
                "HealthCheck",
                TemplateValue::map([
                    ("Target", health_target),
                    ("HealthyThreshold", "2".to_string()),
                    ("UnhealthyThreshold", "5".to_string()),
                    ("Interval", "30".to_string()),
                    ("Timeout", "5".to_string()),
                ]),
            ),
    )?;

    graph.add_resource(
        lc_title.clone(),
        Resource::new("AWS::AutoScaling::LaunchConfiguration")
            .with("ImageId", &config.image_id)
            .with("InstanceType", &config.instance_type)
            .with("KeyName", &ctx.network.keypair)
            .with("SecurityGroups", vec![asg_group])
            .with("UserData", TemplateValue::base64(&config.userdata)),
    )?;

    graph.add_resource(
        asg_title.clone(),
        Resource::new("AWS::AutoScaling::AutoScalingGroup")
            .with("MinSize", config.minsize.to_string())
            .with("MaxSize", config.maxsize.to_string())
            .with("LaunchConfigurationName", TemplateValue::reference(&lc_title))
            .with("LoadBalancerNames", vec![TemplateValue::reference(&elb_title)])
            .with("VPCZoneIdentifier", ctx.provider.subnets(Visibility::Private))
            .with("HealthCheckType", "ELB")
            .with_opt("HealthCheckGracePeriod", config.health_check_grace_period)
            .with("Tags", name_tags(name)),
    )?;

    graph.create_flow(elb, asg, instance_port)?;
    graph.create_flow(asg, ctx.network.nat, Port::Tcp(80))?;
    graph.create_flow(asg, ctx.network.nat, Port::Tcp(443))?;
    graph.create_flow(ctx.network.jump, asg, Port::Tcp(22))?;
    if config.public_unit {
        graph.add_ingress(elb, FlowPeer::Cidr(ctx.network.public_cidr.clone()), listener_port);
    }

    Ok(UnitBoundaries {
        inbound: elb,
        outbound: asg,
    })
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseConfig {
    db_instance_type: String,
    db_engine: String,
    db_port: i64,
    db_allocated_storage: i64,
    #[serde(default)]
    db_backup_window: Option<String>,
    #[serde(default)]
    db_backup_retention: Option<i64>,
    #[serde(default)]
    db_snapshot_id: Option<String>,
}

fn database(
    name: &str,
    config: &DatabaseConfig,
    graph: &mut UnitGraph,
    ctx: &BuildContext<'_>,
) -> GraphResult<UnitBoundaries> {
    let subnet_group = format!("{}SubnetGroup", name);
    let boundary = graph.add_boundary(name, &format!("{} database security group", name))?;
    let group = graph.boundary(boundary).group_ref();

    graph.add_resource(
        subnet_group.clone(),
        Resource::new("AWS::RDS::DBSubnetGroup")
            .with("DBSubnetGroupDescription", format!("{} private subnets", name))
            .with("SubnetIds", ctx.provider.subnets(Visibility::Private)),
    )?;
    graph.add_resource(
        name,
        Resource::new("AWS::RDS::DBInstance")
            .with("AllocatedStorage", config.db_allocated_storage.to_string())
            .with("DBInstanceClass", &config.db_instance_type)
            .with("Engine", &config.db_engine)
            .with("Port", config.db_port.to_string())
            .with("DBSubnetGroupName", TemplateValue::reference(&subnet_group))
            .with("VPCSecurityGroups", vec![group])
            .with_opt("PreferredBackupWindow", config.db_backup_window.clone())
            .with_opt("BackupRetentionPeriod", config.db_backup_retention)
            .with_opt("DBSnapshotIdentifier", config.db_snapshot_id.clone())
            .with("Tags", name_tags(name)),
    )?;

    Ok(UnitBoundaries::single(boundary))
}

#[derive(Debug, Clone, Deserialize)]
struct FunctionConfig {
    lambda_s3_bucket: String,
    lambda_s3_key: String,
    lambda_handler: String,
    lambda_runtime: String,
    #[serde(default)]
    lambda_memory_size: Option<i64>,
    #[serde(default)]
    lambda_timeout: Option<i64>,
    #[serde(default)]
    lambda_environment: BTreeMap<String, String>,
}

fn function(
    name: &str,
    config: &FunctionConfig,
    graph: &mut UnitGraph,
    ctx: &BuildContext<'_>,
) -> GraphResult<UnitBoundaries> {
    let role = format!("{}Role", name);
    let boundary = graph.add_boundary(name, &format!("{} function security group", name))?;
    let group = graph.boundary(boundary).group_ref();

    let assume_role = TemplateValue::map([
        ("Version", TemplateValue::from("2012-10-17")),
        (
            "Statement",
            TemplateValue::List(vec![TemplateValue::map([
                ("Effect", TemplateValue::from("Allow")),
                (
                    "Principal",
                    TemplateValue::map([("Service", vec!["lambda.amazonaws.com"])]),
                ),
                ("Action", TemplateValue::from(vec!["sts:AssumeRole"])),
            ])]),
        ),
    ]);

    graph.add_resource(
        role.clone(),
        Resource::new("AWS::IAM::Role")
            .with("AssumeRolePolicyDocument", assume_role)
            .with(
                "ManagedPolicyArns",
                vec!["arn:aws:iam::aws:policy/service-role/AWSLambdaVPCAccessExecutionRole"],
            ),
    )?;

    let mut function = Resource::new("AWS::Lambda::Function")
        .with(
            "Code",
            TemplateValue::map([("S3Bucket", &config.lambda_s3_bucket), ("S3Key", &config.lambda_s3_key)]),
        )
        .with("Handler", &config.lambda_handler)
        .with("Runtime", &config.lambda_runtime)
        .with("Role", TemplateValue::get_att(&role, "Arn"))
        .with_opt("MemorySize", config.lambda_memory_size)
        .with_opt("Timeout", config.lambda_timeout)
        .with(
            "VpcConfig",
            TemplateValue::map([
                ("SecurityGroupIds", TemplateValue::List(vec![group])),
                ("SubnetIds", TemplateValue::List(ctx.provider.subnets(Visibility::Private))),
            ]),
        );
    if !config.lambda_environment.is_empty() {
        function = function.with(
            "Environment",
            TemplateValue::map([(
                "Variables",
                TemplateValue::map(config.lambda_environment.iter().map(|(k, v)| (k.clone(), v.clone()))),
            )]),
        );
    }
    graph.add_resource(name, function)?;

    Ok(UnitBoundaries::single(boundary))
}

#[derive(Debug, Clone, Deserialize)]
struct GatewayConfig {
    stage_name: String,
    #[serde(default)]
    gateway_description: Option<String>,
}

fn gateway(name: &str, config: &GatewayConfig, graph: &mut UnitGraph) -> GraphResult<UnitBoundaries> {
    let boundary = graph.add_boundary(name, &format!("{} gateway security group", name))?;

    graph.add_resource(
        name,
        Resource::new("AWS::ApiGateway::RestApi")
            .with("Name", name)
            .with_opt("Description", config.gateway_description.clone()),
    )?;
    graph.add_resource(
        format!("{}Deployment", name),
        Resource::new("AWS::ApiGateway::Deployment")
            .with("RestApiId", TemplateValue::reference(name))
            .with("StageName", &config.stage_name),
    )?;

    Ok(UnitBoundaries::single(boundary))
}

#[derive(Debug, Clone, Deserialize)]
struct OriginConfig {
    origin_id: String,
    domain_name: String,
    #[serde(default)]
    origin_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DistributionConfig {
    #[serde(default)]
    origins: Vec<OriginConfig>,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    default_root_object: Option<String>,
    #[serde(default)]
    price_class: Option<String>,
    #[serde(default)]
    acm_cert_arn: Option<String>,
}

fn distribution(
    name: &str,
    config: &DistributionConfig,
    graph: &mut UnitGraph,
) -> GraphResult<UnitBoundaries> {
    let boundary = graph.add_boundary(name, &format!("{} distribution security group", name))?;

    let origins: Vec<TemplateValue> = config
        .origins
        .iter()
        .map(|origin| {
            let mut entries = BTreeMap::new();
            entries.insert("Id".to_string(), TemplateValue::from(&origin.origin_id));
            entries.insert("DomainName".to_string(), TemplateValue::from(&origin.domain_name));
            if let Some(path) = &origin.origin_path {
                entries.insert("OriginPath".to_string(), TemplateValue::from(path));
            }
            entries.insert(
                "CustomOriginConfig".to_string(),
                TemplateValue::map([("OriginProtocolPolicy", "https-only")]),
            );
            TemplateValue::Map(entries)
        })
        .collect();

    let mut settings = BTreeMap::new();
    settings.insert("Enabled".to_string(), TemplateValue::Bool(true));
    settings.insert("Aliases".to_string(), TemplateValue::from(config.aliases.clone()));
    if let Some(first) = config.origins.first() {
        settings.insert(
            "DefaultCacheBehavior".to_string(),
            TemplateValue::map([
                ("TargetOriginId", TemplateValue::from(&first.origin_id)),
                ("ViewerProtocolPolicy", TemplateValue::from("redirect-to-https")),
                (
                    "ForwardedValues",
                    TemplateValue::map([("QueryString", false)]),
                ),
            ]),
        );
    }
    settings.insert("Origins".to_string(), TemplateValue::List(origins));
    if let Some(object) = &config.default_root_object {
        settings.insert("DefaultRootObject".to_string(), TemplateValue::from(object));
    }
    if let Some(class) = &config.price_class {
        settings.insert("PriceClass".to_string(), TemplateValue::from(class));
    }
    if let Some(arn) = &config.acm_cert_arn {
        settings.insert(
            "ViewerCertificate".to_string(),
            TemplateValue::map([
                ("AcmCertificateArn", arn.as_str()),
                ("SslSupportMethod", "sni-only"),
            ]),
        );
    }

    graph.add_resource(
        name,
        Resource::new("AWS::CloudFront::Distribution")
            .with("DistributionConfig", TemplateValue::Map(settings)),
    )?;

    Ok(UnitBoundaries::single(boundary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::synthesize;
    use strata_config::{ConfigLoader, ConfigMerger, ConfigTree, SchemaRegistry};

    fn build_one(user: &str) -> (UnitGraph, UnitBoundaries) {
        let registry = SchemaRegistry::builtin().unwrap();
        let user = ConfigTree::from_yaml_str(user).unwrap();
        let defaults = ConfigLoader::builtin_defaults().unwrap();
        let united = ConfigMerger::new(&registry).unwrap().merge(&user, &defaults).unwrap();

        let settings = NetworkSettings::from_config(&united).unwrap();
        let provider = settings.provider().unwrap();
        let mut graph = UnitGraph::new(&settings.graph_name, provider.vpc());
        let network = synthesize(&mut graph, &settings, &provider, None).unwrap();
        let unit = UnitDescriptor::from_config(&united, &registry).unwrap().remove(0);

        let ctx = BuildContext {
            settings: &settings,
            provider: &provider,
            network: &network,
        };
        let boundaries = StandardMaterializer.materialize(&unit, &mut graph, &ctx).unwrap();
        (graph, boundaries)
    }

    #[test]
    fn test_compute_pool_has_separate_inbound_and_outbound() {
        let (graph, boundaries) = build_one(
            "keypair: k\nautoscaling_units:\n  - unit_title: web\n    public_unit: true\n",
        );
        assert_ne!(boundaries.inbound, boundaries.outbound);
        assert_eq!(graph.boundary(boundaries.inbound).title, "webElb");
        assert_eq!(graph.boundary(boundaries.outbound).title, "webAsg");

        let template = graph.finish().unwrap();
        for name in [
            "webElb",
            "webAsg",
            "webLc",
            "webElb80TowebAsg80Ingress",
            "webAsg443ToNat443Egress",
            "Jump22TowebAsg22Ingress",
            "PublicIp80TowebElb80Ingress",
        ] {
            assert!(template.resource(name).is_some(), "missing {}", name);
        }
        assert_eq!(
            template.resource("webElb").unwrap().property("Scheme"),
            Some(&TemplateValue::Str("internet-facing".to_string()))
        );
    }

    #[test]
    fn test_private_compute_pool_is_not_reachable_from_public_cidr() {
        let (graph, _) = build_one("keypair: k\nautoscaling_units:\n  - unit_title: api\n");
        let template = graph.finish().unwrap();
        assert!(template.resource("PublicIp80ToapiElb80Ingress").is_none());
        assert_eq!(
            template.resource("apiElb").unwrap().property("Scheme"),
            Some(&TemplateValue::Str("internal".to_string()))
        );
    }

    #[test]
    fn test_database_uses_private_subnets() {
        let (graph, boundaries) = build_one("keypair: k\ndatabase_units:\n  - unit_title: db1\n");
        assert_eq!(boundaries.inbound, boundaries.outbound);
        let template = graph.finish().unwrap();
        let subnets = template.resource("db1SubnetGroup").unwrap().property("SubnetIds").unwrap();
        assert_eq!(
            subnets,
            &TemplateValue::List(vec![
                TemplateValue::reference("PrivateSubnet1"),
                TemplateValue::reference("PrivateSubnet2"),
                TemplateValue::reference("PrivateSubnet3"),
            ])
        );
    }

    #[test]
    fn test_function_references_its_role() {
        let (graph, _) = build_one(
            "keypair: k\nlambda_units:\n  - unit_title: fn1\n    lambda_s3_bucket: b\n    lambda_s3_key: k.zip\n",
        );
        let template = graph.finish().unwrap();
        assert_eq!(
            template.resource("fn1").unwrap().property("Role"),
            Some(&TemplateValue::get_att("fn1Role", "Arn"))
        );
    }

    #[test]
    fn test_distribution_without_origins_still_materializes() {
        let (graph, _) = build_one("keypair: k\ncf_distribution_units:\n  - unit_title: cdn\n");
        let template = graph.finish().unwrap();
        assert_eq!(
            template.resource("cdn").map(|r| r.kind.as_str()),
            Some("AWS::CloudFront::Distribution")
        );
    }
}
