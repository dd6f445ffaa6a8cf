//! Shared types for the CRD definitions

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of the KT Cloud infrastructure kinds
pub const INFRASTRUCTURE_GROUP: &str = "infrastructure.dcnlab.ssu.ac.kr";

/// API group of the Cluster API core kinds
pub const CLUSTER_API_GROUP: &str = "cluster.x-k8s.io";

/// Reference to another object, as carried by Cluster API specs
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Kind of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Name of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Namespace of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Machine role derived from the Cluster API naming convention
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MachineRole {
    /// Runs the Kubernetes control plane
    ControlPlane,
    /// Runs workloads
    Worker,
}

impl MachineRole {
    /// Infer the role from an object name
    ///
    /// Cluster API names control plane machines `<cluster>-control-plane-<hash>`.
    pub fn from_name(name: &str) -> Self {
        if name.contains("control-plane") {
            Self::ControlPlane
        } else {
            Self::Worker
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_plane_role_is_inferred_from_name() {
        assert_eq!(
            MachineRole::from_name("demo-control-plane-x7k2p"),
            MachineRole::ControlPlane
        );
        assert_eq!(
            MachineRole::from_name("demo-md-0-5d8f9-abcde"),
            MachineRole::Worker
        );
    }

    #[test]
    fn object_reference_omits_unset_fields() {
        let reference = ObjectReference {
            kind: Some("KTCluster".to_string()),
            name: Some("demo".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&reference).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "KTCluster", "name": "demo"}));
    }
}
