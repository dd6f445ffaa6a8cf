//! Cluster reconciler
//!
//! Makes the Cluster API `Cluster` an owner of the `KTCluster` with the same
//! name. The KTCluster may be created after the Cluster, so a missing
//! counterpart only schedules another look.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::{ensure_owner, Context, LinkOutcome};
use crate::crd::Cluster;
use crate::graph::OwnershipResolver;
use crate::store::{LinkableKind, ObjectKey};
use crate::Error;

/// Reconcile a Cluster
///
/// Once the KTCluster lists the Cluster as owner the pair is left alone
/// until one of the two objects changes.
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<Cluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = ObjectKey::of(cluster.as_ref());
    let resolver = OwnershipResolver::new(ctx.kube.as_ref());

    let Some(kt_cluster) = resolver.kt_cluster_for(&cluster).await? else {
        let delay = ctx.backoff_delay(&key);
        info!(retry_in_secs = delay.as_secs(), "KTCluster not found yet");
        return Ok(Action::requeue(delay));
    };

    let outcome = ensure_owner(
        ctx.kube.as_ref(),
        LinkableKind::KTCluster,
        &kt_cluster.metadata,
        cluster.as_ref(),
    )
    .await?;
    if outcome == LinkOutcome::AlreadyLinked {
        debug!("KTCluster already owned by cluster");
    }

    ctx.reset_backoff(&key);
    Ok(Action::await_change())
}
