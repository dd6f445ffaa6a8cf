//! Wire types for the KT Cloud API

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crd::{Link, SecurityGroupName};

/// Floating address type that can be bound with static NAT
pub const PUBLIC_IP_TYPE_ASSOCIATE: &str = "ASSOCIATE";

// =============================================================================
// Servers
// =============================================================================

/// Body of `POST /server/servers`
#[derive(Clone, Debug, Serialize)]
pub struct CreateServerRequest<'a> {
    /// Server to create
    pub server: &'a ServerCreate,
}

/// Server creation parameters
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct ServerCreate {
    /// Server name
    pub name: String,

    /// Key pair name
    #[serde(skip_serializing_if = "String::is_empty")]
    pub key_name: String,

    /// Flavor id
    #[serde(rename = "flavorRef")]
    pub flavor_ref: String,

    /// Availability zone
    #[serde(skip_serializing_if = "String::is_empty")]
    pub availability_zone: String,

    /// Networks to attach
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkAttachment>,

    /// Boot and data volumes
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub block_device_mapping_v2: Vec<BlockDevice>,

    /// Cloud-init user data, passed through unchanged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
}

/// A network attachment, by network or port
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct NetworkAttachment {
    /// Network uuid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    /// Port uuid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

/// Block device mapping (v2 format)
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct BlockDevice {
    /// Source uuid
    pub uuid: String,

    /// Boot order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_index: Option<i32>,

    /// Source type
    pub source_type: String,

    /// Destination type
    pub destination_type: String,

    /// Size in GiB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_size: Option<u32>,

    /// Delete with the server
    pub delete_on_termination: bool,
}

/// `{"server": {...}}` response envelope
#[derive(Clone, Debug, Deserialize)]
pub struct ServerEnvelope {
    /// The server record
    pub server: Server,
}

/// Server record as reported by the provider
///
/// Create responses only fill `id`, `adminPass`, `links` and
/// `security_groups`; query responses fill the rest.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Server {
    /// Server id
    pub id: String,

    /// Initial administrator password
    #[serde(default, rename = "adminPass")]
    pub admin_pass: Option<String>,

    /// Links
    #[serde(default)]
    pub links: Vec<Link>,

    /// Security groups
    #[serde(default)]
    pub security_groups: Vec<SecurityGroupName>,

    /// Server name
    #[serde(default)]
    pub name: Option<String>,

    /// Status (`BUILD`, `ACTIVE`, `ERROR`, ...)
    #[serde(default)]
    pub status: Option<String>,

    /// Task state
    #[serde(default, rename = "OS-EXT-STS:task_state")]
    pub task_state: Option<String>,

    /// VM state
    #[serde(default, rename = "OS-EXT-STS:vm_state")]
    pub vm_state: Option<String>,

    /// Power state
    #[serde(default, rename = "OS-EXT-STS:power_state")]
    pub power_state: Option<i32>,

    /// Build progress
    #[serde(default)]
    pub progress: Option<i32>,

    /// Availability zone
    #[serde(default, rename = "OS-EXT-AZ:availability_zone")]
    pub availability_zone: Option<String>,

    /// Addresses keyed by network name
    #[serde(default)]
    pub addresses: BTreeMap<String, Vec<WireAddress>>,

    /// Flavor
    #[serde(default)]
    pub flavor: Option<WireFlavor>,

    /// Key pair name
    #[serde(default)]
    pub key_name: Option<String>,

    /// Tenant id
    #[serde(default)]
    pub tenant_id: Option<String>,

    /// User id
    #[serde(default)]
    pub user_id: Option<String>,

    /// Host id
    #[serde(default, rename = "hostId")]
    pub host_id: Option<String>,

    /// Created timestamp
    #[serde(default)]
    pub created: Option<String>,

    /// Updated timestamp
    #[serde(default)]
    pub updated: Option<String>,

    /// Launch timestamp
    #[serde(default, rename = "OS-SRV-USG:launched_at")]
    pub launched_at: Option<String>,
}

/// Server address as reported by the provider
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct WireAddress {
    /// IP address
    #[serde(default)]
    pub addr: String,

    /// IP version
    #[serde(default)]
    pub version: Option<u8>,

    /// `fixed` or `floating`
    #[serde(default, rename = "OS-EXT-IPS:type")]
    pub kind: Option<String>,

    /// MAC address
    #[serde(default, rename = "OS-EXT-IPS-MAC:mac_addr")]
    pub mac_addr: Option<String>,
}

/// Flavor as reported by the provider
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct WireFlavor {
    /// Flavor name
    #[serde(default)]
    pub original_name: Option<String>,
    /// Virtual CPUs
    #[serde(default)]
    pub vcpus: Option<u32>,
    /// Memory in MiB
    #[serde(default)]
    pub ram: Option<u64>,
    /// Disk in GiB
    #[serde(default)]
    pub disk: Option<u64>,
}

// =============================================================================
// Public addresses and static NAT
// =============================================================================

/// Response of `GET /nc/IpAddress`
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PublicIpListEnvelope {
    /// Response body
    #[serde(default)]
    pub nc_listentpublicipsresponse: PublicIpList,
}

/// List of enterprise public addresses
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PublicIpList {
    /// Addresses
    #[serde(default)]
    pub publicips: Vec<PublicIp>,
}

/// An enterprise public address
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct PublicIp {
    /// Address id
    pub id: String,

    /// The public IP
    pub ip: String,

    /// Address type (`ASSOCIATE`, `SOURCENAT`, ...)
    #[serde(default, rename = "type")]
    pub kind: String,

    /// Virtual IPs already bound to this address
    #[serde(default)]
    pub virtualips: Vec<VirtualIp>,

    /// VPC id
    #[serde(default)]
    pub vpcid: Option<String>,

    /// Zone id
    #[serde(default)]
    pub zoneid: Option<String>,

    /// Owning account
    #[serde(default)]
    pub account: Option<String>,

    /// Enterprise public CIDR id
    #[serde(default)]
    pub entpubliccidrid: Option<String>,
}

impl PublicIp {
    /// Returns true if the address can be bound to a new machine
    pub fn is_available(&self) -> bool {
        self.virtualips.is_empty() && self.kind == PUBLIC_IP_TYPE_ASSOCIATE
    }

    /// Returns true if static NAT already maps this address to `guest_ip`
    pub fn is_bound_to(&self, guest_ip: &str) -> bool {
        self.virtualips.iter().any(|v| v.vmguestip == guest_ip)
    }
}

/// A virtual IP bound to a public address
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct VirtualIp {
    /// Virtual IP id
    #[serde(default)]
    pub id: String,
    /// Guest IP behind the NAT
    #[serde(default)]
    pub vmguestip: String,
    /// Public address
    #[serde(default)]
    pub ipaddress: String,
    /// Public address id
    #[serde(default)]
    pub ipaddressid: String,
    /// Guest network id
    #[serde(default)]
    pub networkid: String,
    /// VPC id
    #[serde(default)]
    pub vpcid: String,
    /// Name
    #[serde(default)]
    pub name: String,
}

/// Keep the addresses that can be bound: type `ASSOCIATE` and no virtual IPs
pub fn available_addresses(ips: Vec<PublicIp>) -> Vec<PublicIp> {
    ips.into_iter().filter(PublicIp::is_available).collect()
}

/// Body of `POST /nc/StaticNat`
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct StaticNatRequest {
    /// Private address of the machine
    pub vmguestip: String,
    /// Network tier of the machine
    pub vmnetworkid: String,
    /// Public address id to bind
    pub entpublicipid: String,
}

/// Response of `POST /nc/StaticNat`
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StaticNatEnvelope {
    /// Response body
    #[serde(default)]
    pub nc_enablestaticnatresponse: StaticNatResult,
}

/// Outcome of a static NAT request
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StaticNatResult {
    /// Provider message
    #[serde(default)]
    pub displaytext: String,
    /// Whether the binding was created
    #[serde(default)]
    pub success: bool,
}

// =============================================================================
// Identity
// =============================================================================

/// Body of `POST /identity/auth/tokens`
#[derive(Clone, Debug, Serialize)]
pub struct AuthRequest<'a> {
    /// Authentication section
    pub auth: Auth<'a>,
}

/// Identity and scope
#[derive(Clone, Debug, Serialize)]
pub struct Auth<'a> {
    /// Who is authenticating
    pub identity: AuthIdentity<'a>,
    /// What the token is for
    pub scope: AuthScope<'a>,
}

/// Identity section
#[derive(Clone, Debug, Serialize)]
pub struct AuthIdentity<'a> {
    /// Methods, usually `["password"]`
    pub methods: &'a [String],
    /// Password method payload
    pub password: AuthPassword<'a>,
}

/// Password method payload
#[derive(Clone, Debug, Serialize)]
pub struct AuthPassword<'a> {
    /// The user
    pub user: AuthUser<'a>,
}

/// User credentials
#[derive(Clone, Serialize)]
pub struct AuthUser<'a> {
    /// User domain
    pub domain: AuthDomain<'a>,
    /// User name
    pub name: &'a str,
    /// Password
    pub password: &'a str,
}

impl std::fmt::Debug for AuthUser<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthUser")
            .field("domain", &self.domain)
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Domain reference
#[derive(Clone, Debug, Serialize)]
pub struct AuthDomain<'a> {
    /// Domain id
    pub id: &'a str,
}

/// Scope section
#[derive(Clone, Debug, Serialize)]
pub struct AuthScope<'a> {
    /// Project scope
    pub project: AuthProject<'a>,
}

/// Project scope
#[derive(Clone, Debug, Serialize)]
pub struct AuthProject<'a> {
    /// Project domain
    pub domain: AuthDomain<'a>,
    /// Project name
    pub name: &'a str,
}

/// Response of `POST /identity/auth/tokens`
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AuthResponse {
    /// Token metadata
    #[serde(default)]
    pub token: AuthTokenBody,
}

/// Token metadata
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AuthTokenBody {
    /// Expiry timestamp
    #[serde(default, alias = "expiresAt")]
    pub expires_at: Option<String>,
}
