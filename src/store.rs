//! Resource store access
//!
//! All Kubernetes reads and writes the reconcilers perform go through the
//! [`KubeClient`] trait so they can be mocked in tests. Lookups return
//! `Ok(None)` for objects that do not exist; absence is a normal state while a
//! cluster is being assembled.
//!
//! Writes are merge patches carrying `metadata.resourceVersion`, so the API
//! server rejects them with 409 when the object changed after it was read.
//! Those surface as [`Error::Conflict`].

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

#[cfg(test)]
use mockall::automock;

use crate::crd::{
    Cluster, KTCluster, KTMachine, KTMachineStatus, KTMachineTemplate, KTSubjectToken,
    MachineDeployment,
};
use crate::Error;

/// Field manager recorded on every write
pub const FIELD_MANAGER: &str = "ktcloud-operator";

/// Kinds whose owner references the operator maintains
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LinkableKind {
    /// Cluster API `Cluster`
    Cluster,
    /// `KTCluster`
    KTCluster,
    /// `KTMachineTemplate`
    KTMachineTemplate,
}

impl LinkableKind {
    /// Kubernetes kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cluster => "Cluster",
            Self::KTCluster => "KTCluster",
            Self::KTMachineTemplate => "KTMachineTemplate",
        }
    }
}

/// Address of a namespaced object
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Object kind
    pub kind: String,
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl ObjectKey {
    /// Key for a namespaced resource
    pub fn of<K: Resource<DynamicType = ()>>(obj: &K) -> Self {
        Self {
            kind: K::kind(&()).to_string(),
            namespace: obj.meta().namespace.clone().unwrap_or_default(),
            name: obj.meta().name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Trait abstracting Kubernetes operations needed by the reconcilers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a Cluster API Cluster
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, Error>;

    /// Get a KTCluster
    async fn get_kt_cluster(&self, namespace: &str, name: &str)
        -> Result<Option<KTCluster>, Error>;

    /// Get a KTMachine
    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<KTMachine>, Error>;

    /// Get a KTMachineTemplate
    async fn get_machine_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KTMachineTemplate>, Error>;

    /// List MachineDeployments in a namespace
    async fn list_machine_deployments(
        &self,
        namespace: &str,
    ) -> Result<Vec<MachineDeployment>, Error>;

    /// Get a KTSubjectToken
    async fn get_subject_token(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KTSubjectToken>, Error>;

    /// Replace the owner reference list of an object
    ///
    /// # Arguments
    ///
    /// * `target` - Object to update
    /// * `owner_references` - Complete new owner list
    /// * `resource_version` - Version the list was computed from
    async fn patch_owner_references(
        &self,
        target: LinkableKind,
        namespace: &str,
        name: &str,
        owner_references: Vec<OwnerReference>,
        resource_version: Option<String>,
    ) -> Result<(), Error>;

    /// Write the status of a KTMachine, returning the updated object
    ///
    /// The write is conditional on `machine`'s resourceVersion. The status
    /// replaces what `machine` holds: fields present there but absent from
    /// `status` are removed.
    async fn patch_machine_status(
        &self,
        machine: &KTMachine,
        status: &KTMachineStatus,
    ) -> Result<KTMachine, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + fmt::Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_owners<K>(
        &self,
        namespace: &str,
        name: &str,
        owner_references: Vec<OwnerReference>,
        resource_version: Option<String>,
    ) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + fmt::Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let patch = owner_references_patch(owner_references, resource_version);
        api.patch(
            name,
            &merge_params(),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(Error::from_write)?;
        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn get_kt_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KTCluster>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<KTMachine>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn get_machine_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KTMachineTemplate>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn list_machine_deployments(
        &self,
        namespace: &str,
    ) -> Result<Vec<MachineDeployment>, Error> {
        let api: Api<MachineDeployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_subject_token(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KTSubjectToken>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn patch_owner_references(
        &self,
        target: LinkableKind,
        namespace: &str,
        name: &str,
        owner_references: Vec<OwnerReference>,
        resource_version: Option<String>,
    ) -> Result<(), Error> {
        match target {
            LinkableKind::Cluster => {
                self.patch_owners::<Cluster>(namespace, name, owner_references, resource_version)
                    .await
            }
            LinkableKind::KTCluster => {
                self.patch_owners::<KTCluster>(namespace, name, owner_references, resource_version)
                    .await
            }
            LinkableKind::KTMachineTemplate => {
                self.patch_owners::<KTMachineTemplate>(
                    namespace,
                    name,
                    owner_references,
                    resource_version,
                )
                .await
            }
        }
    }

    async fn patch_machine_status(
        &self,
        machine: &KTMachine,
        status: &KTMachineStatus,
    ) -> Result<KTMachine, Error> {
        let namespace = machine.namespace().unwrap_or_default();
        let api: Api<KTMachine> = Api::namespaced(self.client.clone(), &namespace);
        let patch = machine_status_patch(machine, status)?;

        api.patch_status(
            &machine.name_any(),
            &merge_params(),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(Error::from_write)
    }
}

/// Parameters for the operator's merge patches
pub(crate) fn merge_params() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.into()),
        ..Default::default()
    }
}

/// Merge patch body replacing `metadata.ownerReferences`
pub(crate) fn owner_references_patch(
    owner_references: Vec<OwnerReference>,
    resource_version: Option<String>,
) -> Value {
    let mut metadata = Map::new();
    metadata.insert(
        "ownerReferences".to_string(),
        serde_json::json!(owner_references),
    );
    if let Some(rv) = resource_version {
        metadata.insert("resourceVersion".to_string(), Value::String(rv));
    }
    serde_json::json!({ "metadata": metadata })
}

/// Merge patch body that makes the stored status equal to `status`
///
/// JSON merge patches only add or overwrite, so keys the current status has
/// and the new one lacks are sent as explicit nulls.
pub(crate) fn machine_status_patch(
    machine: &KTMachine,
    status: &KTMachineStatus,
) -> Result<Value, Error> {
    let mut next = serde_json::to_value(status)
        .map_err(|e| Error::serialization(format!("failed to encode machine status: {e}")))?;
    if let Some(previous) = &machine.status {
        let previous = serde_json::to_value(previous)
            .map_err(|e| Error::serialization(format!("failed to encode machine status: {e}")))?;
        null_removed_keys(&previous, &mut next);
    }

    let mut metadata = Map::new();
    if let Some(rv) = machine.resource_version() {
        metadata.insert("resourceVersion".to_string(), Value::String(rv));
    }
    Ok(serde_json::json!({ "metadata": metadata, "status": next }))
}

fn null_removed_keys(previous: &Value, next: &mut Value) {
    if let (Value::Object(prev), Value::Object(next)) = (previous, next) {
        for (key, prev_value) in prev {
            match next.get_mut(key) {
                Some(next_value) => null_removed_keys(prev_value, next_value),
                None => {
                    next.insert(key.clone(), Value::Null);
                }
            }
        }
    }
}
