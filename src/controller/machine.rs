//! KTMachine reconciler
//!
//! Drives each machine through its lifecycle:
//!
//! ```text
//! Unprovisioned ──create──▶ Provisioning ──built──▶ Ready
//!       │                                              ▲
//!       └──create, CP, ext──▶ AwaitingPublicIp ──bind──┘
//! ```
//!
//! A control plane machine of a cluster with an external network waits for
//! its public address whatever the provider reports for the server.
//!
//! Every pass starts by resolving the subject token of the machine's cluster.
//! Once `status.id` is set the server is never created again; the provider is
//! the source of truth for everything else in status except the public
//! addresses this reconciler binds.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::Context;
use crate::cloud::provisioner::{
    attach_public_ip, server_create_for, status_changed, status_from_server,
};
use crate::cloud::SubjectToken;
use crate::credentials::{resolve_token, TokenResolution};
use crate::crd::{KTMachine, KTMachineStatus, MachineState, SERVER_STATUS_BUILD};
use crate::retry::{retry_with_backoff_if, RetryConfig};
use crate::store::ObjectKey;
use crate::Error;

/// Reconcile a KTMachine
#[instrument(skip(machine, ctx), fields(machine = %machine.name_any()))]
pub async fn reconcile(machine: Arc<KTMachine>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = ObjectKey::of(machine.as_ref());

    let (token, cluster) = match resolve_token(ctx.kube.as_ref(), &machine).await? {
        TokenResolution::Ready { token, cluster } => (token, cluster),
        TokenResolution::Pending(reason) => {
            let delay = ctx.backoff_delay(&key);
            info!(%reason, retry_in_secs = delay.as_secs(), "waiting for subject token");
            return Ok(Action::requeue(delay));
        }
    };
    let external = cluster.spec.control_plane_external_network_enable;

    let state = machine.state(external);
    debug!(?state, "current machine state");

    let action = match state {
        MachineState::Unprovisioned => provision(&machine, &token, &ctx).await?,
        MachineState::Provisioning { server_id }
        | MachineState::AwaitingPublicIp { server_id }
        | MachineState::Ready { server_id } => {
            observe(&machine, &server_id, &token, external, &ctx).await?
        }
    };

    ctx.reset_backoff(&key);
    Ok(action)
}

/// Create the server and record its id
async fn provision(
    machine: &KTMachine,
    token: &SubjectToken,
    ctx: &Context,
) -> Result<Action, Error> {
    let request = server_create_for(machine)?;
    info!(flavor = %request.flavor_ref, "creating server");

    let server = ctx.cloud.create_instance(token, &request).await?;
    if server.id.is_empty() {
        return Err(Error::provider("create response has no server id"));
    }
    info!(server_id = %server.id, "server creation submitted");

    let status = status_from_server(&server, machine.status.as_ref());
    write_status(ctx, machine, |current| {
        // A concurrent pass may already have recorded a server
        current.server_id().is_none().then(|| status.clone())
    })
    .await?;

    Ok(Action::requeue(ctx.config.provisioning_interval()))
}

/// Mirror the provider's view of the server and bind a public address if needed
async fn observe(
    machine: &KTMachine,
    server_id: &str,
    token: &SubjectToken,
    external: bool,
    ctx: &Context,
) -> Result<Action, Error> {
    let server = ctx.cloud.query_instance(token, server_id).await?;
    if server.id.is_empty() {
        return Err(Error::provider(format!(
            "query for server {server_id} returned no id"
        )));
    }

    let mut machine = machine.clone();
    if status_changed(machine.status.as_ref(), &server) {
        info!(
            server_id,
            from = ?machine.status.as_ref().and_then(|s| s.status.as_deref()),
            to = ?server.status,
            "server status changed"
        );
        machine = write_status(ctx, &machine, |current| {
            let stored = current.status.as_ref();
            status_changed(stored, &server).then(|| status_from_server(&server, stored))
        })
        .await?;
    }

    match machine.state(external) {
        MachineState::AwaitingPublicIp { .. } if still_building(&machine) => {
            debug!(status = ?server.status, "waiting for a private address to bind");
            Ok(Action::requeue(ctx.config.provisioning_interval()))
        }
        MachineState::AwaitingPublicIp { .. } => {
            let assigned = attach_public_ip(ctx.cloud.as_ref(), token, &machine).await?;
            write_status(ctx, &machine, |current| {
                let mut status = current.status.clone().unwrap_or_default();
                if status.assigned_public_ips.iter().any(|ip| ip.id == assigned.id) {
                    return None;
                }
                status.assigned_public_ips.push(assigned.clone());
                Some(status)
            })
            .await?;
            info!(public_ip = %assigned.ip, "control plane machine is reachable");
            Ok(Action::requeue(ctx.config.steady_interval()))
        }
        MachineState::Ready { .. } => Ok(Action::requeue(ctx.config.steady_interval())),
        MachineState::Provisioning { .. } => {
            debug!(status = ?server.status, "server is still being built");
            Ok(Action::requeue(ctx.config.provisioning_interval()))
        }
        MachineState::Unprovisioned => Err(Error::validation(
            "machine lost its server id while being observed",
        )),
    }
}

/// Returns true while the provider builds the server and has assigned no
/// private address yet
fn still_building(machine: &KTMachine) -> bool {
    machine.status.as_ref().is_some_and(|s| {
        s.first_private_address().is_none()
            && s.status.as_deref().map_or(true, |st| st == SERVER_STATUS_BUILD)
    })
}

/// Write the status computed by `mutate`, re-reading the machine after a conflict
///
/// `mutate` sees the latest stored machine and returns `None` when nothing
/// needs to change. Returns the machine as stored after the write.
async fn write_status<F>(ctx: &Context, machine: &KTMachine, mutate: F) -> Result<KTMachine, Error>
where
    F: Fn(&KTMachine) -> Option<KTMachineStatus>,
{
    let namespace = machine.namespace().unwrap_or_default();
    let name = machine.name_any();
    let attempts = AtomicU32::new(0);

    let attempts = &attempts;
    let mutate = &mutate;
    let namespace = namespace.as_str();
    let name = name.as_str();

    retry_with_backoff_if(
        &RetryConfig::conflict(),
        "write machine status",
        Error::is_conflict,
        move || async move {
            let current = if attempts.fetch_add(1, Ordering::Relaxed) == 0 {
                machine.clone()
            } else {
                warn!(machine = %name, "re-reading machine after write conflict");
                ctx.kube
                    .get_machine(namespace, name)
                    .await?
                    .ok_or_else(|| Error::validation(format!("KTMachine {name} no longer exists")))?
            };

            match mutate(&current) {
                Some(status) => ctx.kube.patch_machine_status(&current, &status).await,
                None => Ok(current),
            }
        },
    )
    .await
}
