//! Wiring of the reconcilers into kube-rs controllers

use std::fmt::Debug;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::controller::{Action, Error as ControllerError};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::Controller;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use super::{cluster, error_policy, kt_cluster, machine, Context};
use crate::crd::{Cluster, KTCluster, KTMachine, KTMachineTemplate};
use crate::store::ObjectKey;
use crate::Error;

type ReconcileResult<K> = Result<(ObjectRef<K>, Action), ControllerError<Error, watcher::Error>>;

/// Api for `K`, limited to the watched namespace when one is configured
fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Log the outcome of one reconcile
///
/// A requeue that fires after its object was deleted surfaces as
/// `ObjectNotFound`; the object's backoff entry is dropped then.
fn report<K>(ctx: &Context, result: ReconcileResult<K>)
where
    K: Resource<DynamicType = ()>,
{
    let kind = K::kind(&());
    match result {
        Ok((obj, action)) => debug!(object = %obj, ?action, "{kind} reconciliation completed"),
        Err(ControllerError::ObjectNotFound(obj)) => {
            let key = ObjectKey {
                kind: kind.to_string(),
                namespace: obj.namespace.clone().unwrap_or_default(),
                name: obj.name.clone(),
            };
            ctx.reset_backoff(&key);
            debug!(object = %key, "object is gone, dropped its backoff");
        }
        Err(e) => error!(error = ?e, "{kind} reconciliation error"),
    }
}

/// Run the Cluster, KTCluster and KTMachine controllers until shutdown
///
/// Returns when any controller stream ends, which happens after a shutdown
/// signal.
pub async fn run_controllers(client: Client, ctx: Arc<Context>) {
    let namespace = ctx.config.watch_namespace.clone();
    let namespace = namespace.as_deref();

    info!(namespace = ?namespace, "Starting KT Cloud controllers...");
    info!("  - Cluster controller");
    info!("  - KTCluster controller");
    info!("  - KTMachine controller");

    let cluster_controller = Controller::new(
        scoped_api::<Cluster>(&client, namespace),
        WatcherConfig::default(),
    )
    .owns(
        scoped_api::<KTCluster>(&client, namespace),
        WatcherConfig::default(),
    )
    .shutdown_on_signal()
    .run(cluster::reconcile, error_policy::<Cluster>, ctx.clone())
    .for_each(|result| {
        report(&ctx, result);
        futures::future::ready(())
    });

    let kt_cluster_controller = Controller::new(
        scoped_api::<KTCluster>(&client, namespace),
        WatcherConfig::default(),
    )
    .owns(
        scoped_api::<Cluster>(&client, namespace),
        WatcherConfig::default(),
    )
    .owns(
        scoped_api::<KTMachineTemplate>(&client, namespace),
        WatcherConfig::default(),
    )
    .shutdown_on_signal()
    .run(kt_cluster::reconcile, error_policy::<KTCluster>, ctx.clone())
    .for_each(|result| {
        report(&ctx, result);
        futures::future::ready(())
    });

    let machine_controller = Controller::new(
        scoped_api::<KTMachine>(&client, namespace),
        WatcherConfig::default(),
    )
    .shutdown_on_signal()
    .run(machine::reconcile, error_policy::<KTMachine>, ctx.clone())
    .for_each(|result| {
        report(&ctx, result);
        futures::future::ready(())
    });

    tokio::select! {
        _ = cluster_controller => info!("Cluster controller completed"),
        _ = kt_cluster_controller => info!("KTCluster controller completed"),
        _ = machine_controller => info!("KTMachine controller completed"),
    }
}
