//! Cluster declaration kinds
//!
//! A cluster is declared twice: once as a Cluster API `Cluster` and once as the
//! provider-specific `KTCluster`. The two halves share a name and namespace and
//! end up owning each other.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::ObjectReference;

/// Partial view of the Cluster API `Cluster` spec
///
/// Only the fields this operator reads are modelled. Writes go through merge
/// patches, so the fields left out here are never dropped on the server.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    plural = "clusters",
    status = "ClusterStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Reference to the provider-specific infrastructure object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,

    /// Reference to the control plane provider object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_ref: Option<ObjectReference>,
}

/// Partial view of the Cluster API `Cluster` status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Lifecycle phase reported by Cluster API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// Desired state of a KT Cloud cluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.dcnlab.ssu.ac.kr",
    version = "v1beta1",
    kind = "KTCluster",
    plural = "ktclusters",
    shortname = "ktc",
    namespaced,
    printcolumn = r#"{"name":"ExternalCP","type":"boolean","jsonPath":".spec.controlPlaneExternalNetworkEnable"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KTClusterSpec {
    /// Load balancer in front of the Kubernetes API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_load_balancer: Option<ApiServerLoadBalancer>,

    /// Give control plane machines a public address
    #[serde(default)]
    pub control_plane_external_network_enable: bool,

    /// Cloud identity used for this cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_ref: Option<IdentityRef>,

    /// Security groups managed on behalf of the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_security_groups: Option<ManagedSecurityGroups>,

    /// Subnets managed on behalf of the cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_subnets: Vec<ManagedSubnet>,
}

/// API server load balancer settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerLoadBalancer {
    /// Whether a load balancer is provisioned
    pub enabled: bool,
}

/// Reference to the cloud identity for a cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRef {
    /// Cloud entry name inside the identity
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cloud_name: String,

    /// Name of the identity object
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

/// Security groups managed for all cluster nodes
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedSecurityGroups {
    /// Rules applied to every node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all_nodes_security_group_rules: Vec<SecurityGroupRule>,
}

/// A single security group rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupRule {
    /// Human readable description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// `ingress` or `egress`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub direction: String,

    /// `IPv4` or `IPv6`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ether_type: String,

    /// Rule name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// First port of the range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_min: Option<u16>,

    /// Last port of the range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_max: Option<u16>,

    /// IP protocol (`tcp`, `udp`, `icmp`)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,

    /// Managed groups allowed as the remote side
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_managed_groups: Vec<String>,
}

/// A subnet managed for the cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedSubnet {
    /// Subnet CIDR
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cidr: String,

    /// DNS servers handed out on the subnet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_nameservers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kt_cluster_spec_parses_provider_manifest() {
        let yaml = r#"
apiServerLoadBalancer:
  enabled: true
controlPlaneExternalNetworkEnable: true
identityRef:
  cloudName: ktcloud
  name: demo-credentials
managedSecurityGroups:
  allNodesSecurityGroupRules:
    - description: Created by cluster-api-provider - BGP (calico)
      direction: ingress
      etherType: IPv4
      name: BGP (Calico)
      portRangeMin: 179
      portRangeMax: 179
      protocol: tcp
      remoteManagedGroups: [controlplane, worker]
managedSubnets:
  - cidr: 10.6.0.0/24
    dnsNameservers: [8.8.8.8]
"#;
        let spec: KTClusterSpec = serde_yaml::from_str(yaml).unwrap();

        assert!(spec.control_plane_external_network_enable);
        assert_eq!(spec.api_server_load_balancer, Some(ApiServerLoadBalancer { enabled: true }));
        let rules = &spec.managed_security_groups.unwrap().all_nodes_security_group_rules;
        assert_eq!(rules[0].port_range_min, Some(179));
        assert_eq!(rules[0].remote_managed_groups.len(), 2);
        assert_eq!(spec.managed_subnets[0].dns_nameservers, vec!["8.8.8.8"]);
    }

    #[test]
    fn external_network_defaults_to_disabled() {
        let spec: KTClusterSpec = serde_yaml::from_str("{}").unwrap();
        assert!(!spec.control_plane_external_network_enable);
    }

    #[test]
    fn cluster_spec_ignores_unmodelled_capi_fields() {
        let yaml = r#"
clusterNetwork:
  pods:
    cidrBlocks: [192.168.0.0/16]
infrastructureRef:
  apiVersion: infrastructure.dcnlab.ssu.ac.kr/v1beta1
  kind: KTCluster
  name: demo
"#;
        let spec: ClusterSpec = serde_yaml::from_str(yaml).unwrap();
        let infra = spec.infrastructure_ref.unwrap();
        assert_eq!(infra.kind.as_deref(), Some("KTCluster"));
        assert_eq!(infra.name.as_deref(), Some("demo"));
    }
}
