// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance provisioning with resource-group rollback.
//!
//! Every resource of an instance lives in its own resource group, so undoing a
//! partial build is a single cascading group delete.
//!
//! ```text
//! running ─► group ─► vnet ─► public ip ─► nic ─► vm ─► refresh ip ─► success
//!               │        │         │         │      │         │
//!               └────────┴─────────┴─────────┴──────┴─────────┴─► failure ─► delete group
//! ```

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::error::{StoreError, WorkflowError};
use crate::image::OsImage;
use crate::naming::{self, ResourceNames};
use crate::persistence::TaskStore;
use crate::platform::{
    CloudPlatform, Credentials, IpAllocation, IpConfiguration, IpSku, NetworkInterfaceParams,
    PlatformConnector, PlatformError, PublicIpParams, SubnetParams, VirtualMachineParams,
    VirtualNetworkParams,
};
use crate::task::TaskStatus;

/// Address space of every instance network.
pub const VNET_ADDRESS_SPACE: &str = "10.0.0.0/16";
/// Prefix of the single instance subnet.
pub const SUBNET_PREFIX: &str = "10.0.0.0/24";
/// Name of the single instance subnet.
pub const SUBNET_NAME: &str = "default";
/// Name of the interface IP configuration.
pub const IP_CONFIG_NAME: &str = "ipconfig1";

fn default_ip_type() -> IpAllocation {
    IpAllocation::Static
}

/// A request to provision one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// Target region, e.g. `westeurope`.
    pub region: String,
    /// Instance size, e.g. `Standard_B1s`.
    pub vm_size: String,
    /// OS disk size in GB.
    pub disk_size: u32,
    /// OS image selector, see [`OsImage`].
    pub os_image: String,
    /// Public address allocation mode.
    #[serde(default = "default_ip_type")]
    pub ip_type: IpAllocation,
    /// Optional base64 bootstrap payload.
    #[serde(default)]
    pub user_data: Option<String>,
}

impl ProvisionRequest {
    /// Resolve the OS image selector.
    pub fn image(&self) -> Result<OsImage, WorkflowError> {
        self.os_image.parse()
    }

    /// Check everything that can be checked without the platform.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        self.image()?;
        prepare_custom_data(self.user_data.as_deref())?;
        Ok(())
    }

    fn public_ip_params(&self) -> PublicIpParams {
        let (sku, allocation) = match self.ip_type {
            IpAllocation::Dynamic => (IpSku::Basic, IpAllocation::Dynamic),
            IpAllocation::Static => (IpSku::Standard, IpAllocation::Static),
        };
        PublicIpParams {
            location: self.region.clone(),
            sku,
            allocation,
        }
    }
}

/// Decode a base64 bootstrap payload and re-encode it for the platform.
///
/// The payload must decode to UTF-8 text. An absent or empty payload yields
/// `None`.
pub fn prepare_custom_data(user_data: Option<&str>) -> Result<Option<String>, WorkflowError> {
    let Some(encoded) = user_data.filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| WorkflowError::InvalidUserData(format!("not valid base64: {}", e)))?;
    let text = String::from_utf8(bytes).map_err(|_| {
        WorkflowError::InvalidUserData("decoded payload is not UTF-8 text".to_string())
    })?;

    Ok(Some(STANDARD.encode(text.as_bytes())))
}

/// Everything one provisioning run needs.
#[derive(Clone)]
pub struct ProvisionJob {
    /// Task tracking this run.
    pub task_id: String,
    /// Platform credentials.
    pub credentials: Credentials,
    /// Instance and resource-group names.
    pub names: ResourceNames,
    /// Admin login for the instance.
    pub admin_username: String,
    /// Generated admin secret.
    pub admin_password: String,
    /// The request.
    pub request: ProvisionRequest,
}

impl fmt::Debug for ProvisionJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionJob")
            .field("task_id", &self.task_id)
            .field("names", &self.names)
            .field("admin_username", &self.admin_username)
            .field("admin_password", &"***")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// Result payload recorded for a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionOutcome {
    /// Instance name.
    pub vm_name: String,
    /// Public address of the instance.
    pub public_ip: Option<String>,
    /// Admin login.
    pub admin_username: String,
    /// Admin secret.
    pub admin_password: String,
}

/// Failure text recorded into the task.
pub fn failure_result(resource_group: &str, err: &WorkflowError) -> String {
    format!(
        "virtual machine {} creation failed: {}",
        resource_group,
        err.failure_reason()
    )
}

/// Run one provisioning workflow to a terminal state.
///
/// Never returns an error: workflow failures are recorded into the task and
/// store failures are logged.
#[instrument(
    skip_all,
    fields(task_id = %job.task_id, vm_name = %job.names.vm_name, region = %job.request.region)
)]
pub async fn run_provision(
    store: &dyn TaskStore,
    connector: &dyn PlatformConnector,
    job: ProvisionJob,
) {
    if let Err(e) = store
        .transition(&job.task_id, TaskStatus::Running, None)
        .await
    {
        error!(error = %e, code = e.error_code(), "Failed to mark task running");
        return;
    }

    let (image, custom_data) = match job
        .request
        .image()
        .and_then(|image| Ok((image, prepare_custom_data(job.request.user_data.as_deref())?)))
    {
        Ok(v) => v,
        Err(e) => {
            record_failure(store, &job, &e).await;
            return;
        }
    };

    let platform = match connector.connect(&job.credentials).await {
        Ok(p) => p,
        Err(e) => {
            record_failure(store, &job, &WorkflowError::from(e)).await;
            return;
        }
    };

    let outcome = build_out(platform.as_ref(), &job, image, custom_data)
        .await
        .and_then(|outcome| Ok(serde_json::to_string(&outcome)?));

    match outcome {
        Ok(result) => {
            match store
                .transition(&job.task_id, TaskStatus::Success, Some(&result))
                .await
            {
                Ok(()) => info!("Virtual machine provisioned"),
                Err(e) => error!(error = %e, code = e.error_code(), "Failed to record success"),
            }
        }
        Err(e) => {
            record_failure(store, &job, &e).await;
            compensate(platform.as_ref(), &job.names.resource_group).await;
        }
    }
}

async fn record_failure(store: &dyn TaskStore, job: &ProvisionJob, err: &WorkflowError) {
    warn!(error = %err, code = err.error_code(), "Provisioning failed");

    let result = failure_result(&job.names.resource_group, err);
    if let Err(e) = store
        .transition(&job.task_id, TaskStatus::Failure, Some(&result))
        .await
    {
        error!(error = %e, code = e.error_code(), "Failed to record failure");
    }
}

/// Fail a task whose workflow panicked.
///
/// A task that already reached a terminal state is left alone.
pub async fn record_crash(store: &dyn TaskStore, task_id: &str, resource_group: &str) {
    let result = failure_result(resource_group, &WorkflowError::Crashed);
    match store
        .transition(task_id, TaskStatus::Failure, Some(&result))
        .await
    {
        Ok(()) => warn!(task_id, resource_group, "Crashed provisioning recorded as failed"),
        Err(StoreError::TerminalTask { .. }) => {}
        Err(e) => error!(task_id, error = %e, code = e.error_code(), "Failed to record crash"),
    }
}

/// Create every resource of the instance, in dependency order.
pub async fn build_out(
    platform: &dyn CloudPlatform,
    job: &ProvisionJob,
    image: OsImage,
    custom_data: Option<String>,
) -> Result<ProvisionOutcome, WorkflowError> {
    let request = &job.request;
    let rg = job.names.resource_group.as_str();
    let vm_name = job.names.vm_name.as_str();

    platform
        .create_or_update_resource_group(rg, &request.region)
        .await?;
    info!(resource_group = rg, "Resource group ready");

    let vnet = platform
        .begin_create_or_update_virtual_network(
            rg,
            &naming::vnet_name(vm_name),
            &VirtualNetworkParams {
                location: request.region.clone(),
                address_prefixes: vec![VNET_ADDRESS_SPACE.to_string()],
                subnets: vec![SubnetParams {
                    name: SUBNET_NAME.to_string(),
                    address_prefix: SUBNET_PREFIX.to_string(),
                }],
            },
        )
        .await?
        .await?;
    let subnet_id = vnet
        .subnets
        .first()
        .map(|s| s.id.clone())
        .ok_or_else(|| {
            PlatformError::new(format!("virtual network {} has no subnet", vnet.name))
        })?;

    let pip_name = naming::public_ip_name(vm_name);
    let pip = platform
        .begin_create_or_update_public_ip(rg, &pip_name, &request.public_ip_params())
        .await?
        .await?;

    let nic = platform
        .begin_create_or_update_network_interface(
            rg,
            &naming::nic_name(vm_name),
            &NetworkInterfaceParams {
                location: request.region.clone(),
                ip_configurations: vec![IpConfiguration {
                    name: IP_CONFIG_NAME.to_string(),
                    subnet_id: Some(subnet_id),
                    public_ip_address_id: Some(pip.id.clone()),
                }],
            },
        )
        .await?
        .await?;
    info!(nic = %nic.name, public_ip = %pip.name, "Network ready");

    platform
        .begin_create_or_update_virtual_machine(
            rg,
            vm_name,
            &VirtualMachineParams {
                location: request.region.clone(),
                vm_size: request.vm_size.clone(),
                image: image.reference(),
                os_disk_size_gb: request.disk_size,
                computer_name: vm_name.to_string(),
                admin_username: job.admin_username.clone(),
                admin_password: job.admin_password.clone(),
                custom_data,
                network_interface_ids: vec![nic.id.clone()],
            },
        )
        .await?
        .await?;

    let pip = platform.get_public_ip(rg, &pip_name).await?;

    Ok(ProvisionOutcome {
        vm_name: vm_name.to_string(),
        public_ip: pip.ip_address,
        admin_username: job.admin_username.clone(),
        admin_password: job.admin_password.clone(),
    })
}

/// Delete the resource group once, swallowing any failure.
pub async fn compensate(platform: &dyn CloudPlatform, resource_group: &str) {
    let deleted = match platform.begin_delete_resource_group(resource_group).await {
        Ok(poller) => poller.await,
        Err(e) => Err(e),
    };

    match deleted {
        Ok(()) => info!(resource_group, "Rolled back resource group"),
        Err(e) => warn!(resource_group, error = %e, "Rollback of resource group failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ProvisionRequest {
        ProvisionRequest {
            region: "westeurope".to_string(),
            vm_size: "Standard_B1s".to_string(),
            disk_size: 30,
            os_image: "ubuntu22".to_string(),
            ip_type: IpAllocation::Static,
            user_data: None,
        }
    }

    #[test]
    fn test_custom_data_round_trips_text() {
        let encoded = STANDARD.encode("#!/bin/sh\necho hello\n");
        let prepared = prepare_custom_data(Some(&encoded)).unwrap().unwrap();

        assert_eq!(STANDARD.decode(prepared).unwrap(), b"#!/bin/sh\necho hello\n");
    }

    #[test]
    fn test_custom_data_absent_or_empty() {
        assert_eq!(prepare_custom_data(None).unwrap(), None);
        assert_eq!(prepare_custom_data(Some("")).unwrap(), None);
    }

    #[test]
    fn test_custom_data_rejects_garbage() {
        assert!(matches!(
            prepare_custom_data(Some("not base64!!")),
            Err(WorkflowError::InvalidUserData(_))
        ));

        let binary = STANDARD.encode([0xff, 0xfe, 0x00]);
        assert!(matches!(
            prepare_custom_data(Some(&binary)),
            Err(WorkflowError::InvalidUserData(_))
        ));
    }

    #[test]
    fn test_dynamic_request_uses_basic_sku() {
        let mut req = request();
        req.ip_type = IpAllocation::Dynamic;
        let params = req.public_ip_params();
        assert_eq!(params.sku, IpSku::Basic);
        assert_eq!(params.allocation, IpAllocation::Dynamic);

        let params = request().public_ip_params();
        assert_eq!(params.sku, IpSku::Standard);
        assert_eq!(params.allocation, IpAllocation::Static);
    }

    #[test]
    fn test_request_from_panel_json() {
        let req: ProvisionRequest = serde_json::from_str(
            r#"{"region":"eastus","vm_size":"Standard_B2s","disk_size":64,"os_image":"debian12","ip_type":"Dynamic"}"#,
        )
        .unwrap();

        assert_eq!(req.ip_type, IpAllocation::Dynamic);
        assert_eq!(req.user_data, None);
        assert_eq!(req.image().unwrap(), OsImage::Debian12);
    }

    #[test]
    fn test_validate_rejects_unknown_image() {
        let mut req = request();
        req.os_image = "windows99".to_string();
        assert!(matches!(
            req.validate(),
            Err(WorkflowError::UnknownImage(_))
        ));
    }

    #[test]
    fn test_failure_result_text() {
        let err = WorkflowError::UnknownImage("windows99".to_string());
        assert_eq!(
            failure_result("vm-eastus-1-abc", &err),
            "virtual machine vm-eastus-1-abc creation failed: Unknown OS image 'windows99'"
        );
        assert_eq!(
            failure_result("vm-eastus-1-abc", &WorkflowError::Crashed),
            "virtual machine vm-eastus-1-abc creation failed: workflow crashed"
        );
    }

    #[test]
    fn test_job_debug_hides_password() {
        let job = ProvisionJob {
            task_id: "t".to_string(),
            credentials: Credentials {
                tenant_id: "t".to_string(),
                client_id: "c".to_string(),
                client_secret: "s".to_string(),
                subscription_id: "sub".to_string(),
            },
            names: ResourceNames {
                vm_name: "vm".to_string(),
                resource_group: "vm".to_string(),
            },
            admin_username: "azureuser".to_string(),
            admin_password: "Sup3rS3cret!".to_string(),
            request: request(),
        };
        assert!(!format!("{:?}", job).contains("Sup3rS3cret!"));
    }
}
