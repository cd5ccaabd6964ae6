// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cloud platform capability surface.
//!
//! The resource-management API is an external collaborator. Workflows talk to
//! it through [`CloudPlatform`], and build a fresh client for every invocation
//! through [`PlatformConnector`].
//!
//! Long-running operations follow the `begin_*` convention: the call submits
//! the operation and returns a [`Poller`]; awaiting the poller waits for the
//! platform to finish.

pub mod mock;

pub use self::mock::{CallPhase, MockConnector, MockPlatform, Operation, PlatformCall};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::image::ImageReference;

/// Waitable handle for a submitted long-running operation.
pub type Poller<T> = BoxFuture<'static, Result<T, PlatformError>>;

/// Result type for platform calls.
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Error reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformError {
    /// Machine-readable platform error code, when the platform sent one.
    pub code: Option<String>,
    /// Error text.
    pub message: String,
}

impl PlatformError {
    /// An error without a platform code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// An error carrying a platform code.
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "({}) {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for PlatformError {}

/// Service principal used to authenticate against a subscription.
///
/// Passed by value into each workflow; never persisted or logged.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Directory (tenant) ID.
    pub tenant_id: String,
    /// Application (client) ID.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
    /// Target subscription.
    pub subscription_id: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("subscription_id", &self.subscription_id)
            .finish()
    }
}

/// Public address allocation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpAllocation {
    /// Address is fixed at allocation time.
    Static,
    /// Address is assigned when attached to a running instance.
    Dynamic,
}

/// Public address pricing tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpSku {
    /// Basic tier; supports dynamic allocation.
    Basic,
    /// Standard tier; static allocation only.
    Standard,
}

/// A resource group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceGroup {
    /// Group name.
    pub name: String,
    /// Region.
    pub location: String,
}

/// Subnet definition for a new virtual network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetParams {
    /// Subnet name.
    pub name: String,
    /// CIDR prefix.
    pub address_prefix: String,
}

/// Parameters for creating a virtual network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualNetworkParams {
    /// Region.
    pub location: String,
    /// Address space prefixes.
    pub address_prefixes: Vec<String>,
    /// Subnets to create inside the network.
    pub subnets: Vec<SubnetParams>,
}

/// A created subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    /// Resource ID.
    pub id: String,
    /// Subnet name.
    pub name: String,
    /// CIDR prefix.
    pub address_prefix: String,
}

/// A created virtual network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualNetwork {
    /// Resource ID.
    pub id: String,
    /// Network name.
    pub name: String,
    /// Subnets in creation order.
    pub subnets: Vec<Subnet>,
}

/// Parameters for allocating a public address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicIpParams {
    /// Region.
    pub location: String,
    /// Pricing tier.
    pub sku: IpSku,
    /// Allocation method.
    pub allocation: IpAllocation,
}

/// A public address resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicIpAddress {
    /// Resource ID.
    pub id: String,
    /// Resource name.
    pub name: String,
    /// Concrete address, once the platform has assigned one.
    pub ip_address: Option<String>,
    /// Pricing tier.
    pub sku: IpSku,
    /// Allocation method.
    pub allocation: IpAllocation,
}

/// An IP configuration on a network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpConfiguration {
    /// Configuration name.
    pub name: String,
    /// Subnet the configuration is bound to.
    pub subnet_id: Option<String>,
    /// Attached public address, if any.
    pub public_ip_address_id: Option<String>,
}

/// Parameters for creating or updating a network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterfaceParams {
    /// Region.
    pub location: String,
    /// IP configurations.
    pub ip_configurations: Vec<IpConfiguration>,
}

/// A network interface resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    /// Resource ID.
    pub id: String,
    /// Resource name.
    pub name: String,
    /// Region.
    pub location: String,
    /// IP configurations.
    pub ip_configurations: Vec<IpConfiguration>,
}

impl NetworkInterface {
    /// Parameters that recreate this interface as it currently is.
    pub fn to_params(&self) -> NetworkInterfaceParams {
        NetworkInterfaceParams {
            location: self.location.clone(),
            ip_configurations: self.ip_configurations.clone(),
        }
    }
}

/// Parameters for creating a virtual machine.
#[derive(Clone, PartialEq, Eq)]
pub struct VirtualMachineParams {
    /// Region.
    pub location: String,
    /// Instance size, e.g. `Standard_B1s`.
    pub vm_size: String,
    /// OS image.
    pub image: ImageReference,
    /// OS disk size in GB.
    pub os_disk_size_gb: u32,
    /// Hostname inside the guest.
    pub computer_name: String,
    /// Administrator login.
    pub admin_username: String,
    /// Administrator password.
    pub admin_password: String,
    /// Base64 bootstrap payload.
    pub custom_data: Option<String>,
    /// Attached network interfaces.
    pub network_interface_ids: Vec<String>,
}

impl fmt::Debug for VirtualMachineParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualMachineParams")
            .field("location", &self.location)
            .field("vm_size", &self.vm_size)
            .field("image", &self.image)
            .field("os_disk_size_gb", &self.os_disk_size_gb)
            .field("computer_name", &self.computer_name)
            .field("admin_username", &self.admin_username)
            .field("admin_password", &"***")
            .field("custom_data", &self.custom_data.as_ref().map(|_| "..."))
            .field("network_interface_ids", &self.network_interface_ids)
            .finish()
    }
}

/// A virtual machine resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachine {
    /// Resource ID.
    pub id: String,
    /// Instance name.
    pub name: String,
    /// Region.
    pub location: String,
    /// Instance size.
    pub vm_size: String,
    /// Attached network interfaces.
    pub network_interface_ids: Vec<String>,
}

/// Last path segment of a resource ID, i.e. the resource name.
pub fn resource_name(resource_id: &str) -> &str {
    resource_id.rsplit('/').next().unwrap_or(resource_id)
}

/// Resource-management operations consumed by the workflows.
#[allow(missing_docs)]
#[async_trait]
pub trait CloudPlatform: Send + Sync {
    async fn create_or_update_resource_group(
        &self,
        name: &str,
        location: &str,
    ) -> PlatformResult<ResourceGroup>;

    /// Delete a resource group and everything inside it.
    async fn begin_delete_resource_group(&self, name: &str) -> PlatformResult<Poller<()>>;

    async fn begin_create_or_update_virtual_network(
        &self,
        resource_group: &str,
        name: &str,
        params: &VirtualNetworkParams,
    ) -> PlatformResult<Poller<VirtualNetwork>>;

    async fn begin_create_or_update_public_ip(
        &self,
        resource_group: &str,
        name: &str,
        params: &PublicIpParams,
    ) -> PlatformResult<Poller<PublicIpAddress>>;

    async fn get_public_ip(
        &self,
        resource_group: &str,
        name: &str,
    ) -> PlatformResult<PublicIpAddress>;

    async fn begin_delete_public_ip(
        &self,
        resource_group: &str,
        name: &str,
    ) -> PlatformResult<Poller<()>>;

    async fn begin_create_or_update_network_interface(
        &self,
        resource_group: &str,
        name: &str,
        params: &NetworkInterfaceParams,
    ) -> PlatformResult<Poller<NetworkInterface>>;

    async fn get_network_interface(
        &self,
        resource_group: &str,
        name: &str,
    ) -> PlatformResult<NetworkInterface>;

    async fn begin_create_or_update_virtual_machine(
        &self,
        resource_group: &str,
        name: &str,
        params: &VirtualMachineParams,
    ) -> PlatformResult<Poller<VirtualMachine>>;

    async fn get_virtual_machine(
        &self,
        resource_group: &str,
        name: &str,
    ) -> PlatformResult<VirtualMachine>;

    async fn begin_start(&self, resource_group: &str, name: &str) -> PlatformResult<Poller<()>>;

    /// Stop and release compute.
    async fn begin_deallocate(&self, resource_group: &str, name: &str)
    -> PlatformResult<Poller<()>>;

    async fn begin_restart(&self, resource_group: &str, name: &str) -> PlatformResult<Poller<()>>;
}

/// Builds a platform client from a credential reference.
#[async_trait]
pub trait PlatformConnector: Send + Sync {
    /// Build a new client. Called once per workflow invocation.
    async fn connect(&self, credentials: &Credentials) -> PlatformResult<Arc<dyn CloudPlatform>>;
}
