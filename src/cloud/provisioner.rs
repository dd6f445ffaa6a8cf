//! Translation between KTMachine resources and provider calls
//!
//! Limitations: a public address is always bound to the machine's first
//! private address on its first network tier. Machines spanning several tiers
//! get exactly one public address.

use kube::ResourceExt;
use tracing::info;

use super::types::{available_addresses, BlockDevice, NetworkAttachment};
use super::{CloudApi, Server, ServerCreate, StaticNatRequest, SubjectToken};
use crate::crd::{AssignedPublicIp, FlavorStatus, KTMachine, KTMachineStatus, ServerAddress};
use crate::Error;

/// Build the create request for a machine
pub fn server_create_for(machine: &KTMachine) -> Result<ServerCreate, Error> {
    let spec = &machine.spec;
    if spec.flavor.is_empty() {
        return Err(Error::validation(format!(
            "KTMachine {} has no flavor",
            machine.name_any()
        )));
    }

    let networks = spec
        .networks
        .iter()
        .map(|n| NetworkAttachment {
            uuid: Some(n.id.clone()),
            port: None,
        })
        .chain(spec.ports.iter().map(|p| NetworkAttachment {
            uuid: None,
            port: Some(p.id.clone()),
        }))
        .collect();

    let block_device_mapping_v2 = spec
        .block_device_mapping
        .iter()
        .map(|b| BlockDevice {
            uuid: b.id.clone(),
            boot_index: b.boot_index,
            source_type: b.source_type.clone(),
            destination_type: b.destination_type.clone(),
            volume_size: b.volume_size,
            delete_on_termination: b.delete_on_termination,
        })
        .collect();

    Ok(ServerCreate {
        name: machine.name_any(),
        key_name: spec.ssh_key_name.clone(),
        flavor_ref: spec.flavor.clone(),
        availability_zone: spec.availability_zone.clone(),
        networks,
        block_device_mapping_v2,
        user_data: Some(spec.user_data.clone()).filter(|d| !d.is_empty()),
    })
}

/// Machine status mirroring `server`
///
/// Public addresses are recorded by this operator and carried over from
/// `previous`, as is the admin password, which only the create response holds.
pub fn status_from_server(server: &Server, previous: Option<&KTMachineStatus>) -> KTMachineStatus {
    let addresses = server
        .addresses
        .iter()
        .map(|(network, addrs)| {
            let addrs = addrs
                .iter()
                .map(|a| ServerAddress {
                    addr: a.addr.clone(),
                    version: a.version,
                    kind: a.kind.clone(),
                    mac_addr: a.mac_addr.clone(),
                })
                .collect();
            (network.clone(), addrs)
        })
        .collect();

    KTMachineStatus {
        id: server.id.clone(),
        admin_pass: server
            .admin_pass
            .clone()
            .or_else(|| previous.and_then(|p| p.admin_pass.clone())),
        links: server.links.clone(),
        security_groups: server.security_groups.clone(),
        name: server.name.clone(),
        status: server.status.clone(),
        task_state: server.task_state.clone(),
        vm_state: server.vm_state.clone(),
        power_state: server.power_state,
        progress: server.progress,
        availability_zone: server.availability_zone.clone(),
        addresses,
        flavor: server.flavor.as_ref().map(|f| FlavorStatus {
            original_name: f.original_name.clone(),
            vcpus: f.vcpus,
            ram: f.ram,
            disk: f.disk,
        }),
        key_name: server.key_name.clone(),
        tenant_id: server.tenant_id.clone(),
        user_id: server.user_id.clone(),
        host_id: server.host_id.clone(),
        created: server.created.clone(),
        updated: server.updated.clone(),
        launched_at: server.launched_at.clone(),
        assigned_public_ips: previous
            .map(|p| p.assigned_public_ips.clone())
            .unwrap_or_default(),
    }
}

/// Returns true if the provider reports a different status string than stored
pub fn status_changed(stored: Option<&KTMachineStatus>, server: &Server) -> bool {
    stored.and_then(|s| s.status.as_deref()) != server.status.as_deref()
}

/// Private address and network tier a public address is bound to
pub fn static_nat_target(machine: &KTMachine) -> Result<(String, String), Error> {
    let address = machine
        .status
        .as_ref()
        .and_then(|s| s.first_private_address())
        .ok_or_else(|| {
            Error::provider(
                "failed to get machine address to pair with public ip address for snat",
            )
        })?;

    let tier = machine.spec.network_tier.first().ok_or_else(|| {
        Error::validation(format!(
            "KTMachine {} has no network tier to bind a public address to",
            machine.name_any()
        ))
    })?;

    Ok((address.to_string(), tier.id.clone()))
}

/// Bind the first free public address to the machine
///
/// An address static NAT already maps to the machine's private address is
/// returned as is, so a binding whose status write was lost is recorded
/// instead of repeated. Returns the address so the caller can record it in
/// status.
pub async fn attach_public_ip(
    cloud: &dyn CloudApi,
    token: &SubjectToken,
    machine: &KTMachine,
) -> Result<AssignedPublicIp, Error> {
    let (vmguestip, vmnetworkid) = static_nat_target(machine)?;

    let addresses = cloud.list_floating_addresses(token).await?;
    if let Some(bound) = addresses.iter().find(|ip| ip.is_bound_to(&vmguestip)) {
        info!(
            machine = %machine.name_any(),
            public_ip = %bound.ip,
            private_ip = %vmguestip,
            "public address already bound"
        );
        return Ok(AssignedPublicIp {
            id: bound.id.clone(),
            ip: bound.ip.clone(),
        });
    }

    let candidate = available_addresses(addresses)
        .into_iter()
        .next()
        .ok_or_else(|| {
            Error::provider(
                "no available public ip addresses on the cloud, maybe try creating in the cloud in same zone as the cluster",
            )
        })?;

    let request = StaticNatRequest {
        vmguestip,
        vmnetworkid,
        entpublicipid: candidate.id.clone(),
    };
    cloud.attach_floating_address(token, &request).await?;

    info!(
        machine = %machine.name_any(),
        public_ip = %candidate.ip,
        private_ip = %request.vmguestip,
        "bound public address with static NAT"
    );

    Ok(AssignedPublicIp {
        id: candidate.id,
        ip: candidate.ip,
    })
}
