//! Controller implementations for the KT Cloud infrastructure kinds
//!
//! Three reconcilers run side by side:
//!
//! - [`cluster`] pairs each Cluster API `Cluster` with its `KTCluster`
//! - [`kt_cluster`] pairs the other way and adopts the cluster's machine templates
//! - [`machine`] drives a `KTMachine` through provisioning and public address binding
//!
//! All of them share one [`Context`]. Reconcilers return a requeue directive
//! for "not yet" outcomes and reserve errors for failed calls, which
//! [`error_policy`] turns into a backed-off requeue.

pub mod cluster;
pub mod kt_cluster;
pub mod machine;
mod runner;

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use tracing::{error, info, warn};

use crate::cloud::CloudApi;
use crate::config::ControllerConfig;
use crate::graph::{is_owned_by, owner_reference_for, with_owner};
use crate::retry::RequeueBackoff;
use crate::store::{KubeClient, KubeClientImpl, LinkableKind, ObjectKey};
use crate::Error;

pub use runner::run_controllers;

/// Requeue delay after losing a write race; the next pass re-reads the object
pub const CONFLICT_REQUEUE: Duration = Duration::from_secs(5);

/// Controller context containing shared state and clients
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(client, cloud)
///     .config(controller_config)
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// KT Cloud API client
    pub cloud: Arc<dyn CloudApi>,
    /// Requeue cadences
    pub config: ControllerConfig,
    /// Per-object backoff for pending and failed reconciles
    pub backoff: RequeueBackoff,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, cloud: Arc<dyn CloudApi>) -> ContextBuilder {
        ContextBuilder::new(client, cloud)
    }

    /// Delay before retrying `key` after a pending or failed pass
    pub fn backoff_delay(&self, key: &ObjectKey) -> Duration {
        self.backoff.next_delay(&key.to_string())
    }

    /// Forget the failure history of `key` after it made progress
    pub fn reset_backoff(&self, key: &ObjectKey) {
        self.backoff.reset(&key.to_string());
    }

    /// Create a context for testing with custom mock clients
    ///
    /// This method is primarily for unit tests where a real Kubernetes
    /// client is not available. For production code, use [`Context::builder`].
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>, cloud: Arc<dyn CloudApi>) -> Self {
        let config = ControllerConfig::default();
        Self {
            kube,
            cloud,
            backoff: RequeueBackoff::new(config.requeue_policy()),
            config,
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    cloud: Arc<dyn CloudApi>,
    kube: Option<Arc<dyn KubeClient>>,
    config: ControllerConfig,
}

impl ContextBuilder {
    fn new(client: Client, cloud: Arc<dyn CloudApi>) -> Self {
        Self {
            client,
            cloud,
            kube: None,
            config: ControllerConfig::default(),
        }
    }

    /// Set requeue cadences
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            cloud: self.cloud,
            backoff: RequeueBackoff::new(self.config.requeue_policy()),
            config: self.config,
        }
    }
}

/// Error policy shared by every controller
///
/// Lost write races are retried quickly against a fresh read; everything
/// else follows the per-object backoff.
pub fn error_policy<K>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let key = ObjectKey::of(obj.as_ref());
    if error.is_conflict() {
        warn!(object = %key, %error, "write conflict, retrying with a fresh read");
        return Action::requeue(CONFLICT_REQUEUE);
    }

    let delay = ctx.backoff_delay(&key);
    error!(
        object = %key,
        %error,
        retry_in_secs = delay.as_secs(),
        "reconciliation failed"
    );
    Action::requeue(delay)
}

/// Result of making sure an owner reference is present
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The reference was already there; nothing was written
    AlreadyLinked,
    /// The reference was added and persisted
    Linked,
}

/// Add `owner` to the owner references of the object described by `child`
///
/// The write is conditional on the version `child` was read at. An owner
/// without a UID has never been stored and cannot be referenced.
pub(crate) async fn ensure_owner<O>(
    kube: &dyn KubeClient,
    target: LinkableKind,
    child: &ObjectMeta,
    owner: &O,
) -> Result<LinkOutcome, Error>
where
    O: Resource<DynamicType = ()>,
{
    let owner_uid = owner.meta().uid.clone().unwrap_or_default();
    if !owner_uid.is_empty() && is_owned_by(child, &owner_uid) {
        return Ok(LinkOutcome::AlreadyLinked);
    }

    let existing = child.owner_references.clone().unwrap_or_default();
    let reference = owner_reference_for(owner, &existing).ok_or_else(|| {
        Error::validation(format!(
            "{} {} has no uid",
            O::kind(&()),
            owner.name_any()
        ))
    })?;
    let Some(references) = with_owner(&existing, reference) else {
        return Ok(LinkOutcome::AlreadyLinked);
    };

    let namespace = child.namespace.clone().unwrap_or_default();
    let name = child.name.clone().unwrap_or_default();
    kube.patch_owner_references(
        target,
        &namespace,
        &name,
        references,
        child.resource_version.clone(),
    )
    .await?;

    info!(
        child = %format!("{}/{namespace}/{name}", target.as_str()),
        owner = %format!("{}/{}", O::kind(&()), owner.name_any()),
        "added owner reference"
    );
    Ok(LinkOutcome::Linked)
}
