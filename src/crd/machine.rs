//! Machine kinds: KTMachine, KTMachineTemplate and the Cluster API MachineDeployment

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::MachineRole;

/// Provider status string of a running server
pub const SERVER_STATUS_ACTIVE: &str = "ACTIVE";

/// Provider status string of a server that is still being built
pub const SERVER_STATUS_BUILD: &str = "BUILD";

/// Desired state of a single KT Cloud virtual machine
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.dcnlab.ssu.ac.kr",
    version = "v1beta1",
    kind = "KTMachine",
    plural = "ktmachines",
    shortname = "ktm",
    status = "KTMachineStatus",
    namespaced,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"ID","type":"string","jsonPath":".status.id"}"#,
    printcolumn = r#"{"name":"Flavor","type":"string","jsonPath":".spec.flavor"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KTMachineSpec {
    /// Flavor (instance size) id
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub flavor: String,

    /// Name of the SSH key pair injected into the server
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_key_name: String,

    /// Boot and data volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block_device_mapping: Vec<BlockDeviceMapping>,

    /// Network tiers the server is attached to; the first one is used for static NAT
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_tier: Vec<NetworkTier>,

    /// Networks the server is attached to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkRef>,

    /// Pre-created ports to attach
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortRef>,

    /// Availability zone
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub availability_zone: String,

    /// Cloud-init user data
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_data: String,
}

/// A block device attached at boot
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceMapping {
    /// Source id (image or volume uuid)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Boot order, 0 for the root disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_index: Option<i32>,

    /// `image`, `volume`, `snapshot` or `blank`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_type: String,

    /// `volume` or `local`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub destination_type: String,

    /// Size in GiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_size: Option<u32>,

    /// Delete the volume with the server
    #[serde(default)]
    pub delete_on_termination: bool,
}

/// A network tier (KT Cloud VPC tier)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkTier {
    /// Tier network id
    pub id: String,
}

/// A network attachment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRef {
    /// Network uuid
    pub id: String,
}

/// A port attachment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortRef {
    /// Port uuid
    pub id: String,
}

/// Observed state of a KTMachine
///
/// Everything except `assigned_public_ips` mirrors the provider's server
/// record and is overwritten whenever the provider reports a new status.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KTMachineStatus {
    /// Provider server id; empty until the server is created
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Initial administrator password returned on create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_pass: Option<String>,

    /// Provider links for the server
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,

    /// Security groups applied to the server
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<SecurityGroupName>,

    /// Server name as known by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Provider status string (`BUILD`, `ACTIVE`, `ERROR`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Extended task state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_state: Option<String>,

    /// Extended VM state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_state: Option<String>,

    /// Extended power state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_state: Option<i32>,

    /// Build progress in percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i32>,

    /// Availability zone the server landed in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,

    /// Addresses keyed by network name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub addresses: BTreeMap<String, Vec<ServerAddress>>,

    /// Resolved flavor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<FlavorStatus>,

    /// Key pair name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,

    /// Owning tenant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Creating user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Hypervisor host id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,

    /// Creation timestamp reported by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    /// Last update timestamp reported by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,

    /// Launch timestamp reported by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launched_at: Option<String>,

    /// Public addresses bound to this machine through static NAT
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assigned_public_ips: Vec<AssignedPublicIp>,
}

impl KTMachineStatus {
    /// First private address across all networks, in network name order
    ///
    /// Addresses typed `floating` are skipped; untyped addresses count as private.
    pub fn first_private_address(&self) -> Option<&str> {
        self.addresses
            .values()
            .flatten()
            .find(|a| a.kind.as_deref() != Some("floating") && !a.addr.is_empty())
            .map(|a| a.addr.as_str())
    }
}

/// Provider link
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Link {
    /// Relation (`self`, `bookmark`)
    #[serde(default)]
    pub rel: String,
    /// Target URL
    #[serde(default)]
    pub href: String,
}

/// Security group reference by name
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SecurityGroupName {
    /// Group name
    #[serde(default)]
    pub name: String,
}

/// One address of a server
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerAddress {
    /// The IP address
    #[serde(default)]
    pub addr: String,

    /// IP version (4 or 6)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u8>,

    /// `fixed` or `floating`
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// MAC address of the interface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_addr: Option<String>,
}

/// Resolved flavor of a server
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlavorStatus {
    /// Flavor name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    /// Virtual CPUs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcpus: Option<u32>,
    /// Memory in MiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram: Option<u64>,
    /// Root disk in GiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<u64>,
}

/// A public address bound to the machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct AssignedPublicIp {
    /// Provider id of the public address
    pub id: String,
    /// The public IP
    pub ip: String,
}

/// Where a machine is in its lifecycle
///
/// Derived from the stored status; never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MachineState {
    /// No server has been created
    Unprovisioned,
    /// A server exists and the provider is still building it
    Provisioning {
        /// Provider server id
        server_id: String,
    },
    /// Control plane machine that still needs a public address
    AwaitingPublicIp {
        /// Provider server id
        server_id: String,
    },
    /// Built and fully wired up, whatever the provider reports
    Ready {
        /// Provider server id
        server_id: String,
    },
}

impl MachineState {
    /// Server id, if one exists
    pub fn server_id(&self) -> Option<&str> {
        match self {
            Self::Unprovisioned => None,
            Self::Provisioning { server_id }
            | Self::AwaitingPublicIp { server_id }
            | Self::Ready { server_id } => Some(server_id),
        }
    }
}

impl KTMachine {
    /// Role of this machine, from its name
    pub fn role(&self) -> MachineRole {
        MachineRole::from_name(self.metadata.name.as_deref().unwrap_or_default())
    }

    /// Provider server id, if one has been recorded
    pub fn server_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.id.as_str())
            .filter(|id| !id.is_empty())
    }

    /// Returns true if the machine holds at least one public address
    pub fn has_public_ip(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| !s.assigned_public_ips.is_empty())
    }

    /// Classify the machine
    ///
    /// `external_control_plane` is the owning cluster's
    /// `controlPlaneExternalNetworkEnable` flag. A missing public address
    /// takes precedence over the provider status, so a stopped or failed
    /// control plane server is still bound.
    pub fn state(&self, external_control_plane: bool) -> MachineState {
        let Some(server_id) = self.server_id().map(str::to_string) else {
            return MachineState::Unprovisioned;
        };

        if external_control_plane
            && self.role() == MachineRole::ControlPlane
            && !self.has_public_ip()
        {
            return MachineState::AwaitingPublicIp { server_id };
        }

        let building = self
            .status
            .as_ref()
            .and_then(|s| s.status.as_deref())
            .map_or(true, |s| s == SERVER_STATUS_BUILD);
        if building {
            MachineState::Provisioning { server_id }
        } else {
            MachineState::Ready { server_id }
        }
    }
}

/// Reusable machine spec referenced by MachineDeployments
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.dcnlab.ssu.ac.kr",
    version = "v1beta1",
    kind = "KTMachineTemplate",
    plural = "ktmachinetemplates",
    shortname = "ktmt",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct KTMachineTemplateSpec {
    /// Template for machines stamped out from this object
    pub template: KTMachineTemplateResource,
}

/// Body of a KTMachineTemplate
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KTMachineTemplateResource {
    /// Spec copied into every KTMachine
    pub spec: KTMachineSpec,
}

/// Partial view of the Cluster API `MachineDeployment` spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "MachineDeployment",
    plural = "machinedeployments",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentSpec {
    /// Name of the cluster this deployment belongs to
    #[serde(default)]
    pub cluster_name: String,

    /// Desired number of machines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}
