//! Address allocation and network topology.
//!
//! Every availability zone receives one public and one private /24 carved
//! out of the graph's address block. The third octet of a subnet is the
//! number of subnets of the same visibility allocated before it, with
//! private subnets offset by 100 so that the two ranges never meet inside
//! one /16.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GraphError, GraphResult};
use crate::template::TemplateValue;

/// Third-octet offset applied to private subnets.
pub const PRIVATE_OFFSET: u16 = 100;

/// Logical name of the VPC resource.
pub const VPC_TITLE: &str = "Vpc";

/// IPv4 address block in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    address: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    pub fn new(address: Ipv4Addr, prefix: u8) -> GraphResult<Self> {
        if prefix > 32 {
            return Err(GraphError::InvalidCidr(format!("{}/{}", address, prefix)));
        }
        Ok(Self { address, prefix })
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    fn mask(prefix: u8) -> u32 {
        if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix))
        }
    }

    /// Whether the two blocks share any address.
    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        let mask = Self::mask(self.prefix.min(other.prefix));
        (u32::from(self.address) & mask) == (u32::from(other.address) & mask)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, prefix) = s
            .split_once('/')
            .ok_or_else(|| GraphError::InvalidCidr(s.to_string()))?;
        let address = Ipv4Addr::from_str(address).map_err(|_| GraphError::InvalidCidr(s.to_string()))?;
        let prefix = prefix
            .parse::<u8>()
            .map_err(|_| GraphError::InvalidCidr(s.to_string()))?;
        Self::new(address, prefix)
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = GraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ipv4Cidr> for String {
    fn from(cidr: Ipv4Cidr) -> Self {
        cidr.to_string()
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

/// A named address range that can appear as a flow peer, such as the
/// public internet or an office network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidrBlock {
    pub name: String,
    pub cidr: Ipv4Cidr,
}

impl CidrBlock {
    pub fn new(name: impl Into<String>, cidr: &str) -> GraphResult<Self> {
        Ok(Self {
            name: name.into(),
            cidr: cidr.parse()?,
        })
    }
}

/// Subnet visibility class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn title(&self) -> &'static str {
        match self {
            Visibility::Public => "Public",
            Visibility::Private => "Private",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::Private => write!(f, "private"),
        }
    }
}

/// Stateful subnet allocator.
///
/// Results depend on call order: allocating the private subnet of a zone
/// before its public one yields a different, still non-overlapping layout.
#[derive(Debug, Clone)]
pub struct AddressAllocator {
    base: Ipv4Cidr,
    public: u16,
    private: u16,
}

impl AddressAllocator {
    pub fn new(base: Ipv4Cidr) -> Self {
        if base.prefix() > 16 {
            warn!(
                "Address block {} is narrower than /16; allocated /24 subnets may fall outside it",
                base
            );
        }
        Self {
            base,
            public: 0,
            private: 0,
        }
    }

    /// Allocate the next /24 for `visibility`.
    pub fn allocate(&mut self, visibility: Visibility) -> GraphResult<Ipv4Cidr> {
        let (count, offset, limit) = match visibility {
            Visibility::Public => (&mut self.public, 0, PRIVATE_OFFSET),
            Visibility::Private => (&mut self.private, PRIVATE_OFFSET, 256),
        };

        let octet = offset + *count;
        if octet >= limit {
            return Err(GraphError::AddressSpaceExhausted(visibility));
        }
        *count += 1;

        let [a, b, _, _] = self.base.address().octets();
        let cidr = Ipv4Cidr::new(Ipv4Addr::new(a, b, octet as u8, 0), 24)?;
        debug!("Allocated {} subnet {}", visibility, cidr);
        Ok(cidr)
    }

    pub fn allocated(&self, visibility: Visibility) -> u16 {
        match visibility {
            Visibility::Public => self.public,
            Visibility::Private => self.private,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    /// Logical name, e.g. `PublicSubnet1`.
    pub title: String,
    pub zone: String,
    pub visibility: Visibility,
    pub cidr: Ipv4Cidr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub name: String,
    pub public: Subnet,
    pub private: Subnet,
}

/// Allocated zones and subnets of one graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub vpc_cidr: Ipv4Cidr,
    pub zones: Vec<Zone>,
}

impl Topology {
    /// Allocate a public then a private subnet for each zone, in order.
    pub fn allocate(vpc_cidr: Ipv4Cidr, zones: &[String]) -> GraphResult<Self> {
        let mut allocator = AddressAllocator::new(vpc_cidr);
        let mut allocated = Vec::with_capacity(zones.len());

        for (index, zone) in zones.iter().enumerate() {
            let public = allocator.allocate(Visibility::Public)?;
            let private = allocator.allocate(Visibility::Private)?;
            allocated.push(Zone {
                name: zone.clone(),
                public: Subnet {
                    title: subnet_title(Visibility::Public, index),
                    zone: zone.clone(),
                    visibility: Visibility::Public,
                    cidr: public,
                },
                private: Subnet {
                    title: subnet_title(Visibility::Private, index),
                    zone: zone.clone(),
                    visibility: Visibility::Private,
                    cidr: private,
                },
            });
        }

        Ok(Self {
            vpc_cidr,
            zones: allocated,
        })
    }

    pub fn subnets(&self) -> impl Iterator<Item = &Subnet> {
        self.zones.iter().flat_map(|z| [&z.public, &z.private])
    }

    pub fn subnets_of(&self, visibility: Visibility) -> impl Iterator<Item = &Subnet> {
        self.subnets().filter(move |s| s.visibility == visibility)
    }
}

pub fn subnet_title(visibility: Visibility, zone_index: usize) -> String {
    format!("{}Subnet{}", visibility.title(), zone_index + 1)
}

/// Export name under which a tree publishes one of its foundation resources.
pub fn foundation_export(tree_name: &str, title: &str) -> String {
    format!("{}-{}", tree_name, title)
}

/// Source of the network a graph's units are placed into.
#[derive(Debug, Clone)]
pub enum TopologyProvider {
    /// The graph owns and synthesizes its own network.
    Local(Topology),
    /// The network belongs to the tree named here and is imported.
    Imported { tree_name: String, zone_count: usize },
}

impl TopologyProvider {
    pub fn vpc(&self) -> TemplateValue {
        match self {
            TopologyProvider::Local(_) => TemplateValue::reference(VPC_TITLE),
            TopologyProvider::Imported { tree_name, .. } => {
                TemplateValue::ImportValue(foundation_export(tree_name, VPC_TITLE))
            }
        }
    }

    /// References to every subnet of `visibility`, in zone order.
    pub fn subnets(&self, visibility: Visibility) -> Vec<TemplateValue> {
        match self {
            TopologyProvider::Local(topology) => topology
                .subnets_of(visibility)
                .map(|s| TemplateValue::reference(&s.title))
                .collect(),
            TopologyProvider::Imported {
                tree_name,
                zone_count,
            } => (0..*zone_count)
                .map(|i| {
                    TemplateValue::ImportValue(foundation_export(
                        tree_name,
                        &subnet_title(visibility, i),
                    ))
                })
                .collect(),
        }
    }
}
