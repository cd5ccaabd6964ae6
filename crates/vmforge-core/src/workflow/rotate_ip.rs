// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Public address rotation for an existing instance.
//!
//! The old address must be detached and the interface pushed before the old
//! address is deleted; the platform refuses to delete an address that an
//! interface still references. There is no rollback: a failure after the
//! delete leaves the instance without a public address.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::error::RotationError;
use crate::naming;
use crate::platform::{
    CloudPlatform, Credentials, IpAllocation, IpSku, PlatformConnector, PublicIpAddress,
    PublicIpParams, resource_name,
};

/// Target of one rotation run.
#[derive(Clone)]
pub struct RotationJob {
    /// Platform credentials.
    pub credentials: Credentials,
    /// Resource group holding the instance.
    pub resource_group: String,
    /// Instance name.
    pub vm_name: String,
}

impl fmt::Debug for RotationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotationJob")
            .field("resource_group", &self.resource_group)
            .field("vm_name", &self.vm_name)
            .finish_non_exhaustive()
    }
}

/// Run one rotation, logging the outcome.
#[instrument(skip_all, fields(resource_group = %job.resource_group, vm_name = %job.vm_name))]
pub async fn run_rotation(connector: &dyn PlatformConnector, job: RotationJob) {
    let platform = match connector.connect(&job.credentials).await {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "Rotation failed to connect");
            return;
        }
    };

    match rotate_public_ip(platform.as_ref(), &job.resource_group, &job.vm_name, Utc::now()).await
    {
        Ok(pip) => info!(
            public_ip = %pip.name,
            address = pip.ip_address.as_deref().unwrap_or("pending"),
            "Public address rotated"
        ),
        Err(e) => warn!(error = %e, "Public address rotation failed"),
    }
}

/// Replace the public address on the instance's first interface.
pub async fn rotate_public_ip(
    platform: &dyn CloudPlatform,
    resource_group: &str,
    vm_name: &str,
    now: DateTime<Utc>,
) -> Result<PublicIpAddress, RotationError> {
    let vm = platform.get_virtual_machine(resource_group, vm_name).await?;
    let nic_id = vm
        .network_interface_ids
        .first()
        .ok_or_else(|| RotationError::NoNetworkInterface {
            vm_name: vm_name.to_string(),
        })?;
    let nic_name = resource_name(nic_id).to_string();

    let mut nic = platform
        .get_network_interface(resource_group, &nic_name)
        .await?;
    let old_pip_id = nic
        .ip_configurations
        .first_mut()
        .ok_or_else(|| RotationError::NoIpConfiguration {
            nic_name: nic_name.clone(),
        })?
        .public_ip_address_id
        .take();

    if let Some(old_pip_id) = old_pip_id {
        nic = platform
            .begin_create_or_update_network_interface(resource_group, &nic_name, &nic.to_params())
            .await?
            .await?;
        info!(nic = %nic_name, "Old public address detached");

        let old_pip_name = resource_name(&old_pip_id);
        platform
            .begin_delete_public_ip(resource_group, old_pip_name)
            .await?
            .await?;
        info!(public_ip = old_pip_name, "Old public address deleted");
    }

    let new_pip = platform
        .begin_create_or_update_public_ip(
            resource_group,
            &naming::rotated_public_ip_name(vm_name, now),
            &PublicIpParams {
                location: vm.location.clone(),
                sku: IpSku::Standard,
                allocation: IpAllocation::Static,
            },
        )
        .await?
        .await?;

    let config = nic
        .ip_configurations
        .first_mut()
        .ok_or_else(|| RotationError::NoIpConfiguration {
            nic_name: nic_name.clone(),
        })?;
    config.public_ip_address_id = Some(new_pip.id.clone());

    platform
        .begin_create_or_update_network_interface(resource_group, &nic_name, &nic.to_params())
        .await?
        .await?;

    Ok(new_pip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{CallPhase, MockPlatform, Operation, PlatformError};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[tokio::test]
    async fn test_detach_completes_before_delete_is_issued() {
        let platform = MockPlatform::new();
        platform.seed_virtual_machine("rg", "vm1", "westeurope", true);

        let pip = rotate_public_ip(&platform, "rg", "vm1", at(1_700_000_000))
            .await
            .unwrap();
        assert_eq!(pip.name, "pip-vm1-1700000000");

        let calls = platform.calls();
        let detach_done = calls
            .iter()
            .position(|c| {
                c.operation == Operation::CreateNetworkInterface && c.phase == CallPhase::Completed
            })
            .unwrap();
        let delete_issued = calls
            .iter()
            .position(|c| c.operation == Operation::DeletePublicIp && c.phase == CallPhase::Submitted)
            .unwrap();
        assert!(detach_done < delete_issued);

        assert!(platform.public_ip("rg", "pip-vm1").is_none());
        let nic = platform.network_interface("rg", "nic-vm1").unwrap();
        assert_eq!(
            nic.ip_configurations[0].public_ip_address_id.as_deref(),
            Some(pip.id.as_str())
        );
    }

    #[tokio::test]
    async fn test_instance_without_address_only_attaches() {
        let platform = MockPlatform::new();
        platform.seed_virtual_machine("rg", "vm1", "westeurope", false);

        rotate_public_ip(&platform, "rg", "vm1", at(1_700_000_000))
            .await
            .unwrap();

        assert_eq!(platform.submit_count(Operation::DeletePublicIp), 0);
        assert_eq!(platform.submit_count(Operation::CreateNetworkInterface), 1);
    }

    #[tokio::test]
    async fn test_failed_allocation_leaves_instance_bare() {
        let platform = MockPlatform::new();
        platform.seed_virtual_machine("rg", "vm1", "westeurope", true);
        platform.fail_on(
            Operation::CreatePublicIp,
            PlatformError::with_code("PublicIPCountLimitReached", "quota"),
        );

        let err = rotate_public_ip(&platform, "rg", "vm1", at(1_700_000_000))
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::Platform(_)));

        let nic = platform.network_interface("rg", "nic-vm1").unwrap();
        assert!(nic.ip_configurations[0].public_ip_address_id.is_none());
    }

    #[tokio::test]
    async fn test_missing_instance_is_a_platform_error() {
        let platform = MockPlatform::new();

        let err = rotate_public_ip(&platform, "rg", "ghost", at(0))
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::Platform(_)));
    }
}
