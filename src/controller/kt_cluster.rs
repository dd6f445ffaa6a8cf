//! KTCluster reconciler
//!
//! Two jobs, both idempotent:
//!
//! 1. make the KTCluster an owner of the Cluster API `Cluster` with the same name
//! 2. adopt the machine templates named `<cluster>-control-plane` and `<cluster>-md-0`
//!
//! Anything not found yet is retried with backoff. The machine reconciler
//! relies on the template ownership to find a machine's cluster.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{info, instrument};

use super::{ensure_owner, Context};
use crate::crd::KTCluster;
use crate::graph::{template_name, OwnershipResolver, TEMPLATE_SUFFIXES};
use crate::store::{LinkableKind, ObjectKey};
use crate::Error;

/// Reconcile a KTCluster
#[instrument(skip(kt_cluster, ctx), fields(kt_cluster = %kt_cluster.name_any()))]
pub async fn reconcile(kt_cluster: Arc<KTCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = ObjectKey::of(kt_cluster.as_ref());
    let kube = ctx.kube.as_ref();
    let resolver = OwnershipResolver::new(kube);
    let mut missing = Vec::new();

    match resolver.cluster_for(&kt_cluster).await? {
        Some(cluster) => {
            ensure_owner(kube, LinkableKind::Cluster, &cluster.metadata, kt_cluster.as_ref())
                .await?;
        }
        None => missing.push(format!("Cluster {}", kt_cluster.name_any())),
    }

    for suffix in TEMPLATE_SUFFIXES {
        match resolver.template_by_convention(&kt_cluster, suffix).await? {
            Some(template) => {
                ensure_owner(
                    kube,
                    LinkableKind::KTMachineTemplate,
                    &template.metadata,
                    kt_cluster.as_ref(),
                )
                .await?;
            }
            None => missing.push(format!(
                "KTMachineTemplate {}",
                template_name(&kt_cluster.name_any(), suffix)
            )),
        }
    }

    if !missing.is_empty() {
        let delay = ctx.backoff_delay(&key);
        info!(
            missing = ?missing,
            retry_in_secs = delay.as_secs(),
            "waiting for related objects"
        );
        return Ok(Action::requeue(delay));
    }

    ctx.reset_backoff(&key);
    Ok(Action::await_change())
}
