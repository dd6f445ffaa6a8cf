//! Ownership graph resolution
//!
//! The objects that make up a cluster do not reference each other directly.
//! Relationships are derived on demand from three kinds of evidence:
//!
//! - **Owner reference**: the child lists the parent in `ownerReferences`;
//!   the parent is fetched by the name recorded there.
//! - **Naming convention**: the parent and child share a name, or the child's
//!   name is the parent's plus a fixed suffix.
//! - **Reverse scan**: candidates are listed in the namespace and the one whose
//!   UID appears in the child's owner references is kept.
//!
//! Each lookup uses exactly one strategy. A missing relationship is
//! `Ok(None)`, never an error: the other half may simply not exist yet.

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use tracing::debug;

use crate::crd::{Cluster, KTCluster, KTMachine, KTMachineTemplate, MachineDeployment};
use crate::store::KubeClient;
use crate::Error;

/// Suffix of the control plane machine template
pub const CONTROL_PLANE_SUFFIX: &str = "-control-plane";

/// Suffix of the first worker pool machine template
pub const WORKER_POOL_SUFFIX: &str = "-md-0";

/// Machine template suffixes expected for every cluster
pub const TEMPLATE_SUFFIXES: [&str; 2] = [CONTROL_PLANE_SUFFIX, WORKER_POOL_SUFFIX];

/// Name of the machine template for `cluster_name` and `suffix`
pub fn template_name(cluster_name: &str, suffix: &str) -> String {
    format!("{cluster_name}{suffix}")
}

/// First owner reference of the given kind
pub fn owner_of_kind<'a>(meta: &'a ObjectMeta, kind: &str) -> Option<&'a OwnerReference> {
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|r| r.kind == kind)
}

/// Returns true if `meta` lists `uid` among its owners
pub fn is_owned_by(meta: &ObjectMeta, uid: &str) -> bool {
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|r| r.uid == uid)
}

/// Owner reference pointing at `owner`, suitable for adding to `existing`
///
/// The reference blocks deletion of the owner while the dependent exists and
/// is marked as the controller unless `existing` already names a different
/// controller; Kubernetes allows only one. Returns `None` when
/// `owner` has not been persisted yet (no UID).
pub fn owner_reference_for<K>(owner: &K, existing: &[OwnerReference]) -> Option<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    let mut reference = owner.controller_owner_ref(&())?;
    reference.block_owner_deletion = Some(true);
    let other_controller = existing
        .iter()
        .any(|r| r.controller == Some(true) && r.uid != reference.uid);
    if other_controller {
        reference.controller = Some(false);
    }
    Some(reference)
}

/// `existing` with `owner` appended, or `None` if it is already there
pub fn with_owner(existing: &[OwnerReference], owner: OwnerReference) -> Option<Vec<OwnerReference>> {
    if existing.iter().any(|r| r.uid == owner.uid) {
        return None;
    }
    let mut refs = existing.to_vec();
    refs.push(owner);
    Some(refs)
}

/// The chain from a machine up to its cluster
#[derive(Clone, Debug)]
pub struct MachineLineage {
    /// MachineDeployment owning the machine
    pub deployment: MachineDeployment,
    /// Template the deployment stamps machines from
    pub template: KTMachineTemplate,
    /// Cluster owning the template
    pub cluster: KTCluster,
}

/// The first relationship that could not be resolved
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MissingLink {
    /// No MachineDeployment in the namespace owns the machine
    Deployment,
    /// No KTMachineTemplate shares the deployment's name
    Template {
        /// Expected template name
        name: String,
    },
    /// The template has no KTCluster owner yet
    TemplateOwner {
        /// Template name
        template: String,
    },
    /// The KTCluster named by the template's owner reference does not exist
    Cluster {
        /// Expected cluster name
        name: String,
    },
}

impl fmt::Display for MissingLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deployment => write!(f, "no MachineDeployment owns the machine"),
            Self::Template { name } => write!(f, "KTMachineTemplate {name} not found"),
            Self::TemplateOwner { template } => {
                write!(f, "KTMachineTemplate {template} has no KTCluster owner")
            }
            Self::Cluster { name } => write!(f, "KTCluster {name} not found"),
        }
    }
}

/// Result of walking a machine's lineage
#[derive(Clone, Debug)]
pub enum Lineage {
    /// Every link resolved
    Complete(Box<MachineLineage>),
    /// Stopped at the first absent link
    Broken(MissingLink),
}

/// Relationship queries over the resource store
pub struct OwnershipResolver<'a> {
    kube: &'a dyn KubeClient,
}

impl<'a> OwnershipResolver<'a> {
    /// Create a resolver reading through `kube`
    pub fn new(kube: &'a dyn KubeClient) -> Self {
        Self { kube }
    }

    /// KTCluster paired with a Cluster (same name and namespace)
    pub async fn kt_cluster_for(&self, cluster: &Cluster) -> Result<Option<KTCluster>, Error> {
        let namespace = cluster.namespace().unwrap_or_default();
        self.kube
            .get_kt_cluster(&namespace, &cluster.name_any())
            .await
    }

    /// Cluster paired with a KTCluster (same name and namespace)
    pub async fn cluster_for(&self, kt_cluster: &KTCluster) -> Result<Option<Cluster>, Error> {
        let namespace = kt_cluster.namespace().unwrap_or_default();
        self.kube.get_cluster(&namespace, &kt_cluster.name_any()).await
    }

    /// Template named `<cluster><suffix>` in the cluster's namespace
    pub async fn template_by_convention(
        &self,
        kt_cluster: &KTCluster,
        suffix: &str,
    ) -> Result<Option<KTMachineTemplate>, Error> {
        let namespace = kt_cluster.namespace().unwrap_or_default();
        let name = template_name(&kt_cluster.name_any(), suffix);
        self.kube.get_machine_template(&namespace, &name).await
    }

    /// MachineDeployment whose UID appears in the machine's owner references
    pub async fn deployment_owning(
        &self,
        machine: &KTMachine,
    ) -> Result<Option<MachineDeployment>, Error> {
        let namespace = machine.namespace().unwrap_or_default();
        let deployments = self.kube.list_machine_deployments(&namespace).await?;
        Ok(deployments.into_iter().find(|d| {
            d.uid()
                .is_some_and(|uid| is_owned_by(&machine.metadata, &uid))
        }))
    }

    /// Template with the deployment's name and namespace
    pub async fn template_for_deployment(
        &self,
        deployment: &MachineDeployment,
    ) -> Result<Option<KTMachineTemplate>, Error> {
        let namespace = deployment.namespace().unwrap_or_default();
        self.kube
            .get_machine_template(&namespace, &deployment.name_any())
            .await
    }

    /// KTCluster named in the template's `KTCluster` owner reference
    ///
    /// Returns `Ok(None)` both when there is no such reference and when the
    /// referenced cluster does not exist; [`Self::machine_lineage`] tells the
    /// two apart.
    pub async fn cluster_owning_template(
        &self,
        template: &KTMachineTemplate,
    ) -> Result<Option<KTCluster>, Error> {
        let Some(owner) = owner_of_kind(&template.metadata, "KTCluster") else {
            return Ok(None);
        };
        let namespace = template.namespace().unwrap_or_default();
        self.kube.get_kt_cluster(&namespace, &owner.name).await
    }

    /// Walk machine → deployment → template → cluster
    pub async fn machine_lineage(&self, machine: &KTMachine) -> Result<Lineage, Error> {
        let Some(deployment) = self.deployment_owning(machine).await? else {
            return Ok(Lineage::Broken(MissingLink::Deployment));
        };

        let Some(template) = self.template_for_deployment(&deployment).await? else {
            return Ok(Lineage::Broken(MissingLink::Template {
                name: deployment.name_any(),
            }));
        };

        let Some(owner) = owner_of_kind(&template.metadata, "KTCluster") else {
            return Ok(Lineage::Broken(MissingLink::TemplateOwner {
                template: template.name_any(),
            }));
        };
        let owner_name = owner.name.clone();

        let Some(cluster) = self.cluster_owning_template(&template).await? else {
            return Ok(Lineage::Broken(MissingLink::Cluster { name: owner_name }));
        };

        debug!(
            machine = %machine.name_any(),
            deployment = %deployment.name_any(),
            template = %template.name_any(),
            cluster = %cluster.name_any(),
            "resolved machine lineage"
        );

        Ok(Lineage::Complete(Box::new(MachineLineage {
            deployment,
            template,
            cluster,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        ClusterSpec, KTClusterSpec, KTMachineSpec, KTMachineTemplateSpec, MachineDeploymentSpec,
    };
    use crate::store::MockKubeClient;

    fn owner_ref(kind: &str, name: &str, uid: &str, controller: bool) -> OwnerReference {
        OwnerReference {
            api_version: "v1beta1".to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: uid.to_string(),
            controller: Some(controller),
            block_owner_deletion: Some(true),
        }
    }

    fn kt_cluster(name: &str, uid: &str) -> KTCluster {
        let mut c = KTCluster::new(name, KTClusterSpec::default());
        c.metadata.namespace = Some("default".to_string());
        c.metadata.uid = Some(uid.to_string());
        c
    }

    fn deployment(name: &str, uid: &str) -> MachineDeployment {
        let mut d = MachineDeployment::new(name, MachineDeploymentSpec::default());
        d.metadata.namespace = Some("default".to_string());
        d.metadata.uid = Some(uid.to_string());
        d
    }

    fn template(name: &str, owners: Vec<OwnerReference>) -> KTMachineTemplate {
        let mut t = KTMachineTemplate::new(name, KTMachineTemplateSpec::default());
        t.metadata.namespace = Some("default".to_string());
        t.metadata.owner_references = Some(owners);
        t
    }

    fn machine(name: &str, owners: Vec<OwnerReference>) -> KTMachine {
        let mut m = KTMachine::new(name, KTMachineSpec::default());
        m.metadata.namespace = Some("default".to_string());
        m.metadata.owner_references = Some(owners);
        m
    }

    // ===== Pure helpers =====

    #[test]
    fn template_names_follow_cluster_api_convention() {
        let names: Vec<_> = TEMPLATE_SUFFIXES
            .iter()
            .map(|s| template_name("demo", s))
            .collect();
        assert_eq!(names, vec!["demo-control-plane", "demo-md-0"]);
    }

    #[test]
    fn owner_of_kind_ignores_other_kinds() {
        let mut meta = ObjectMeta::default();
        assert!(owner_of_kind(&meta, "KTCluster").is_none());

        meta.owner_references = Some(vec![
            owner_ref("Cluster", "demo", "u1", false),
            owner_ref("KTCluster", "demo", "u2", true),
        ]);
        assert_eq!(owner_of_kind(&meta, "KTCluster").map(|r| r.uid.as_str()), Some("u2"));
        assert!(is_owned_by(&meta, "u1"));
        assert!(!is_owned_by(&meta, "u3"));
    }

    #[test]
    fn adding_an_existing_owner_is_a_no_op() {
        let existing = vec![owner_ref("KTCluster", "demo", "u1", true)];
        assert!(with_owner(&existing, owner_ref("KTCluster", "demo", "u1", true)).is_none());

        let added = with_owner(&existing, owner_ref("Cluster", "demo", "u2", true)).unwrap();
        assert_eq!(added.len(), 2);
    }

    #[test]
    fn second_controller_is_added_as_plain_owner() {
        let owner = kt_cluster("demo", "u-kt");
        let existing = vec![owner_ref("KubeadmControlPlane", "demo", "u-kcp", true)];

        let reference = owner_reference_for(&owner, &existing).unwrap();
        assert_eq!(reference.uid, "u-kt");
        assert_eq!(reference.kind, "KTCluster");
        assert_eq!(reference.controller, Some(false));
        assert_eq!(reference.block_owner_deletion, Some(true));

        let reference = owner_reference_for(&owner, &[]).unwrap();
        assert_eq!(reference.controller, Some(true));
        assert_eq!(reference.block_owner_deletion, Some(true));
    }

    #[test]
    fn unpersisted_owner_yields_no_reference() {
        let owner = KTCluster::new("demo", KTClusterSpec::default());
        assert!(owner_reference_for(&owner, &[]).is_none());
    }

    // ===== Lookups =====

    #[tokio::test]
    async fn counterpart_lookup_uses_same_name_and_namespace() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_kt_cluster()
            .withf(|ns, name| ns == "default" && name == "demo")
            .returning(|_, _| Ok(Some(kt_cluster("demo", "u-kt"))));

        let mut cluster = Cluster::new("demo", ClusterSpec::default());
        cluster.metadata.namespace = Some("default".to_string());

        let found = OwnershipResolver::new(&kube)
            .kt_cluster_for(&cluster)
            .await
            .unwrap();
        assert_eq!(found.map(|c| c.name_any()), Some("demo".to_string()));
    }

    #[tokio::test]
    async fn reverse_scan_matches_owner_uid_not_name() {
        let mut kube = MockKubeClient::new();
        kube.expect_list_machine_deployments().returning(|_| {
            Ok(vec![
                deployment("demo-md-0", "u-other"),
                deployment("demo-md-1", "u-md"),
            ])
        });

        let m = machine("demo-md-0-xyz", vec![owner_ref("MachineDeployment", "stale", "u-md", false)]);
        let found = OwnershipResolver::new(&kube)
            .deployment_owning(&m)
            .await
            .unwrap();
        assert_eq!(found.map(|d| d.name_any()), Some("demo-md-1".to_string()));
    }

    #[tokio::test]
    async fn lineage_resolves_every_link() {
        let mut kube = MockKubeClient::new();
        kube.expect_list_machine_deployments()
            .returning(|_| Ok(vec![deployment("demo-md-0", "u-md")]));
        kube.expect_get_machine_template()
            .withf(|_, name| name == "demo-md-0")
            .returning(|_, name| {
                Ok(Some(template(
                    name,
                    vec![owner_ref("KTCluster", "demo", "u-kt", true)],
                )))
            });
        kube.expect_get_kt_cluster()
            .withf(|_, name| name == "demo")
            .returning(|_, _| Ok(Some(kt_cluster("demo", "u-kt"))));

        let m = machine("demo-md-0-xyz", vec![owner_ref("MachineDeployment", "demo-md-0", "u-md", true)]);
        match OwnershipResolver::new(&kube).machine_lineage(&m).await.unwrap() {
            Lineage::Complete(lineage) => {
                assert_eq!(lineage.deployment.name_any(), "demo-md-0");
                assert_eq!(lineage.template.name_any(), "demo-md-0");
                assert_eq!(lineage.cluster.name_any(), "demo");
            }
            Lineage::Broken(link) => panic!("unexpected missing link: {link}"),
        }
    }

    #[tokio::test]
    async fn lineage_reports_first_missing_link() {
        // No deployment owns the machine
        let mut kube = MockKubeClient::new();
        kube.expect_list_machine_deployments().returning(|_| Ok(vec![]));
        let m = machine("orphan", vec![]);
        assert!(matches!(
            OwnershipResolver::new(&kube).machine_lineage(&m).await.unwrap(),
            Lineage::Broken(MissingLink::Deployment)
        ));

        // Template exists but has not been adopted by its cluster yet
        let mut kube = MockKubeClient::new();
        kube.expect_list_machine_deployments()
            .returning(|_| Ok(vec![deployment("demo-md-0", "u-md")]));
        kube.expect_get_machine_template()
            .returning(|_, name| Ok(Some(template(name, vec![]))));
        let m = machine("demo-md-0-xyz", vec![owner_ref("MachineDeployment", "demo-md-0", "u-md", true)]);
        match OwnershipResolver::new(&kube).machine_lineage(&m).await.unwrap() {
            Lineage::Broken(link) => assert_eq!(
                link,
                MissingLink::TemplateOwner {
                    template: "demo-md-0".to_string()
                }
            ),
            Lineage::Complete(_) => panic!("template without owner must not resolve"),
        }
    }

    #[tokio::test]
    async fn store_errors_are_not_treated_as_absence() {
        let mut kube = MockKubeClient::new();
        kube.expect_list_machine_deployments()
            .returning(|_| Err(Error::provider("apiserver unavailable")));

        let m = machine("demo-md-0-xyz", vec![]);
        assert!(OwnershipResolver::new(&kube).machine_lineage(&m).await.is_err());
    }

    #[test]
    fn missing_links_read_well_in_logs() {
        assert_eq!(
            MissingLink::Template {
                name: "demo-md-0".to_string()
            }
            .to_string(),
            "KTMachineTemplate demo-md-0 not found"
        );
    }
}
