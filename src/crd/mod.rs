//! Custom Resource Definitions for the KT Cloud operator
//!
//! `KTCluster`, `KTMachine`, `KTMachineTemplate` and `KTSubjectToken` are owned
//! by this operator. `Cluster` and `MachineDeployment` are partial typed views
//! of Cluster API kinds installed by Cluster API itself.

mod cluster;
mod machine;
mod token;
mod types;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

pub use cluster::{
    ApiServerLoadBalancer, Cluster, ClusterSpec, ClusterStatus, IdentityRef, KTCluster,
    KTClusterSpec, ManagedSecurityGroups, ManagedSubnet, SecurityGroupRule,
};
pub use machine::{
    AssignedPublicIp, BlockDeviceMapping, FlavorStatus, KTMachine, KTMachineSpec, KTMachineStatus,
    KTMachineTemplate, KTMachineTemplateResource, KTMachineTemplateSpec, Link, MachineDeployment,
    MachineDeploymentSpec, MachineState, NetworkRef, NetworkTier, PortRef, SecurityGroupName,
    ServerAddress, SERVER_STATUS_ACTIVE, SERVER_STATUS_BUILD,
};
pub use token::{KTSubjectToken, KTSubjectTokenSpec};
pub use types::{MachineRole, ObjectReference, CLUSTER_API_GROUP, INFRASTRUCTURE_GROUP};

/// CRDs installed and owned by this operator
pub fn owned_crds() -> Vec<CustomResourceDefinition> {
    vec![
        KTCluster::crd(),
        KTMachine::crd(),
        KTMachineTemplate::crd(),
        KTSubjectToken::crd(),
    ]
}
