// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory platform for tests and local embedding.
//!
//! Keeps a small model of resource groups and their network and compute
//! resources, records every call with its phase, and lets callers inject
//! failures at submission or at completion of any operation. Like the real
//! platform, it refuses to delete a public address that an interface still
//! references.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    CloudPlatform, Credentials, IpAllocation, IpConfiguration, NetworkInterface,
    NetworkInterfaceParams, PlatformConnector, PlatformError, PlatformResult, Poller,
    PublicIpAddress, PublicIpParams, IpSku, ResourceGroup, Subnet, VirtualMachine,
    VirtualMachineParams, VirtualNetwork, VirtualNetworkParams,
};

/// Platform operation kinds, as recorded in the call log.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateResourceGroup,
    DeleteResourceGroup,
    CreateVirtualNetwork,
    CreatePublicIp,
    GetPublicIp,
    DeletePublicIp,
    CreateNetworkInterface,
    GetNetworkInterface,
    CreateVirtualMachine,
    GetVirtualMachine,
    StartVm,
    DeallocateVm,
    RestartVm,
}

/// Where in its lifecycle a call was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// The operation was issued.
    Submitted,
    /// The operation finished successfully.
    Completed,
    /// The operation failed.
    Failed,
}

/// One entry in the call log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformCall {
    /// Operation kind.
    pub operation: Operation,
    /// Resource the operation targeted.
    pub target: String,
    /// Observed phase.
    pub phase: CallPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailAt {
    Submit,
    Completion,
}

type Key = (String, String);

#[derive(Default)]
struct MockState {
    calls: Vec<PlatformCall>,
    failures: HashMap<Operation, (FailAt, PlatformError)>,
    resource_groups: HashMap<String, String>,
    networks: HashMap<Key, VirtualNetwork>,
    public_ips: HashMap<Key, PublicIpAddress>,
    nics: HashMap<Key, NetworkInterface>,
    vms: HashMap<Key, VirtualMachine>,
    next_host: u32,
}

impl MockState {
    fn record(&mut self, operation: Operation, target: &str, phase: CallPhase) {
        self.calls.push(PlatformCall {
            operation,
            target: target.to_string(),
            phase,
        });
    }

    fn failure(&self, operation: Operation, at: FailAt) -> Option<PlatformError> {
        match self.failures.get(&operation) {
            Some((when, err)) if *when == at => Some(err.clone()),
            _ => None,
        }
    }

    fn allocate_address(&mut self) -> String {
        self.next_host += 1;
        format!("20.0.{}.{}", self.next_host / 250, self.next_host % 250 + 4)
    }

    fn require_group(&self, name: &str) -> PlatformResult<()> {
        if self.resource_groups.contains_key(name) {
            Ok(())
        } else {
            Err(PlatformError::with_code(
                "ResourceGroupNotFound",
                format!("Resource group '{}' could not be found.", name),
            ))
        }
    }

    /// Assign concrete addresses to dynamic public IPs reachable from `nic_ids`.
    fn bind_dynamic_addresses(&mut self, resource_group: &str, nic_ids: &[String]) {
        let pip_ids: Vec<String> = self
            .nics
            .values()
            .filter(|nic| nic_ids.contains(&nic.id))
            .flat_map(|nic| nic.ip_configurations.iter())
            .filter_map(|cfg| cfg.public_ip_address_id.clone())
            .collect();

        for pip_id in pip_ids {
            let key = (
                resource_group.to_string(),
                super::resource_name(&pip_id).to_string(),
            );
            let needs_address = self
                .public_ips
                .get(&key)
                .is_some_and(|pip| pip.ip_address.is_none());
            if needs_address {
                let address = self.allocate_address();
                if let Some(pip) = self.public_ips.get_mut(&key) {
                    pip.ip_address = Some(address);
                }
            }
        }
    }
}

fn not_found(kind: &str, name: &str) -> PlatformError {
    PlatformError::with_code(
        "ResourceNotFound",
        format!("The {} '{}' was not found.", kind, name),
    )
}

/// In-memory [`CloudPlatform`] with a call log and failure injection.
#[derive(Clone)]
pub struct MockPlatform {
    state: Arc<Mutex<MockState>>,
    subscription_id: String,
    poll_delay: Duration,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatform {
    /// Create an empty platform whose pollers complete immediately.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            subscription_id: "00000000-0000-0000-0000-000000000000".to_string(),
            poll_delay: Duration::ZERO,
        }
    }

    /// Delay every poller by `delay` before it completes.
    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `operation` fail as soon as it is issued.
    pub fn fail_on(&self, operation: Operation, error: PlatformError) {
        self.state()
            .failures
            .insert(operation, (FailAt::Submit, error));
    }

    /// Make `operation` be accepted but fail when its poller is awaited.
    pub fn fail_on_completion(&self, operation: Operation, error: PlatformError) {
        self.state()
            .failures
            .insert(operation, (FailAt::Completion, error));
    }

    /// Full call log in observation order.
    pub fn calls(&self) -> Vec<PlatformCall> {
        self.state().calls.clone()
    }

    /// Operations in the order they were issued.
    pub fn submitted(&self) -> Vec<Operation> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.phase == CallPhase::Submitted)
            .map(|c| c.operation)
            .collect()
    }

    /// How many times `operation` was issued.
    pub fn submit_count(&self, operation: Operation) -> usize {
        self.submitted()
            .into_iter()
            .filter(|op| *op == operation)
            .count()
    }

    /// Whether a resource group currently exists.
    pub fn has_resource_group(&self, name: &str) -> bool {
        self.state().resource_groups.contains_key(name)
    }

    /// Current state of a public address.
    pub fn public_ip(&self, resource_group: &str, name: &str) -> Option<PublicIpAddress> {
        self.state()
            .public_ips
            .get(&(resource_group.to_string(), name.to_string()))
            .cloned()
    }

    /// Current state of a network interface.
    pub fn network_interface(&self, resource_group: &str, name: &str) -> Option<NetworkInterface> {
        self.state()
            .nics
            .get(&(resource_group.to_string(), name.to_string()))
            .cloned()
    }

    /// Install a running instance without recording any calls.
    ///
    /// Creates the group, a subnet, an interface `nic-{name}` and, when
    /// `with_public_ip` is set, a static address `pip-{name}` attached to it.
    pub fn seed_virtual_machine(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
        with_public_ip: bool,
    ) {
        let mut state = self.state();
        let rg = resource_group.to_string();
        state
            .resource_groups
            .insert(rg.clone(), location.to_string());

        let subnet_id = self.resource_id(
            resource_group,
            "Microsoft.Network/virtualNetworks",
            &format!("vnet-{}/subnets/default", name),
        );

        let public_ip_address_id = if with_public_ip {
            let pip_name = format!("pip-{}", name);
            let address = state.allocate_address();
            let pip = PublicIpAddress {
                id: self.resource_id(
                    resource_group,
                    "Microsoft.Network/publicIPAddresses",
                    &pip_name,
                ),
                name: pip_name.clone(),
                ip_address: Some(address),
                sku: IpSku::Standard,
                allocation: IpAllocation::Static,
            };
            let id = pip.id.clone();
            state.public_ips.insert((rg.clone(), pip_name), pip);
            Some(id)
        } else {
            None
        };

        let nic_name = format!("nic-{}", name);
        let nic = NetworkInterface {
            id: self.resource_id(
                resource_group,
                "Microsoft.Network/networkInterfaces",
                &nic_name,
            ),
            name: nic_name.clone(),
            location: location.to_string(),
            ip_configurations: vec![IpConfiguration {
                name: "ipconfig1".to_string(),
                subnet_id: Some(subnet_id),
                public_ip_address_id,
            }],
        };
        let nic_id = nic.id.clone();
        state.nics.insert((rg.clone(), nic_name), nic);

        let vm = VirtualMachine {
            id: self.resource_id(
                resource_group,
                "Microsoft.Compute/virtualMachines",
                name,
            ),
            name: name.to_string(),
            location: location.to_string(),
            vm_size: "Standard_B1s".to_string(),
            network_interface_ids: vec![nic_id],
        };
        state.vms.insert((rg, name.to_string()), vm);
    }

    fn resource_id(&self, resource_group: &str, provider: &str, name: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/{}/{}",
            self.subscription_id, resource_group, provider, name
        )
    }

    /// Record the submission and apply any submit-time failure.
    fn submit(&self, operation: Operation, target: &str) -> PlatformResult<()> {
        let mut state = self.state();
        state.record(operation, target, CallPhase::Submitted);
        if let Some(err) = state.failure(operation, FailAt::Submit) {
            state.record(operation, target, CallPhase::Failed);
            return Err(err);
        }
        Ok(())
    }

    /// Run a synchronous operation against the model.
    fn immediate<T>(
        &self,
        operation: Operation,
        target: &str,
        apply: impl FnOnce(&mut MockState) -> PlatformResult<T>,
    ) -> PlatformResult<T> {
        self.submit(operation, target)?;
        let mut state = self.state();
        let outcome = apply(&mut state);
        let phase = if outcome.is_ok() {
            CallPhase::Completed
        } else {
            CallPhase::Failed
        };
        state.record(operation, target, phase);
        outcome
    }

    /// Submit a long-running operation; `apply` runs when the poller completes.
    fn begin<T, F>(&self, operation: Operation, target: &str, apply: F) -> PlatformResult<Poller<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut MockState) -> PlatformResult<T> + Send + 'static,
    {
        self.submit(operation, target)?;

        let state = self.state.clone();
        let delay = self.poll_delay;
        let target = target.to_string();

        Ok(Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            let outcome = match state.failure(operation, FailAt::Completion) {
                Some(err) => Err(err),
                None => apply(&mut state),
            };
            let phase = if outcome.is_ok() {
                CallPhase::Completed
            } else {
                CallPhase::Failed
            };
            state.record(operation, &target, phase);
            outcome
        }))
    }
}

#[async_trait]
impl CloudPlatform for MockPlatform {
    async fn create_or_update_resource_group(
        &self,
        name: &str,
        location: &str,
    ) -> PlatformResult<ResourceGroup> {
        self.immediate(Operation::CreateResourceGroup, name, |state| {
            state
                .resource_groups
                .insert(name.to_string(), location.to_string());
            Ok(ResourceGroup {
                name: name.to_string(),
                location: location.to_string(),
            })
        })
    }

    async fn begin_delete_resource_group(&self, name: &str) -> PlatformResult<Poller<()>> {
        let rg = name.to_string();
        self.begin(Operation::DeleteResourceGroup, name, move |state| {
            state.require_group(&rg)?;
            state.resource_groups.remove(&rg);
            state.networks.retain(|(group, _), _| *group != rg);
            state.public_ips.retain(|(group, _), _| *group != rg);
            state.nics.retain(|(group, _), _| *group != rg);
            state.vms.retain(|(group, _), _| *group != rg);
            Ok(())
        })
    }

    async fn begin_create_or_update_virtual_network(
        &self,
        resource_group: &str,
        name: &str,
        params: &VirtualNetworkParams,
    ) -> PlatformResult<Poller<VirtualNetwork>> {
        let rg = resource_group.to_string();
        let vnet_id = self.resource_id(resource_group, "Microsoft.Network/virtualNetworks", name);
        let vnet = VirtualNetwork {
            id: vnet_id.clone(),
            name: name.to_string(),
            subnets: params
                .subnets
                .iter()
                .map(|s| Subnet {
                    id: format!("{}/subnets/{}", vnet_id, s.name),
                    name: s.name.clone(),
                    address_prefix: s.address_prefix.clone(),
                })
                .collect(),
        };

        self.begin(Operation::CreateVirtualNetwork, name, move |state| {
            state.require_group(&rg)?;
            state
                .networks
                .insert((rg, vnet.name.clone()), vnet.clone());
            Ok(vnet)
        })
    }

    async fn begin_create_or_update_public_ip(
        &self,
        resource_group: &str,
        name: &str,
        params: &PublicIpParams,
    ) -> PlatformResult<Poller<PublicIpAddress>> {
        let rg = resource_group.to_string();
        let mut pip = PublicIpAddress {
            id: self.resource_id(resource_group, "Microsoft.Network/publicIPAddresses", name),
            name: name.to_string(),
            ip_address: None,
            sku: params.sku,
            allocation: params.allocation,
        };

        self.begin(Operation::CreatePublicIp, name, move |state| {
            state.require_group(&rg)?;
            if pip.allocation == IpAllocation::Static {
                pip.ip_address = Some(state.allocate_address());
            }
            state
                .public_ips
                .insert((rg, pip.name.clone()), pip.clone());
            Ok(pip)
        })
    }

    async fn get_public_ip(
        &self,
        resource_group: &str,
        name: &str,
    ) -> PlatformResult<PublicIpAddress> {
        let key = (resource_group.to_string(), name.to_string());
        self.immediate(Operation::GetPublicIp, name, |state| {
            state
                .public_ips
                .get(&key)
                .cloned()
                .ok_or_else(|| not_found("public IP address", name))
        })
    }

    async fn begin_delete_public_ip(
        &self,
        resource_group: &str,
        name: &str,
    ) -> PlatformResult<Poller<()>> {
        let key = (resource_group.to_string(), name.to_string());
        let display = name.to_string();

        self.begin(Operation::DeletePublicIp, name, move |state| {
            let pip = state
                .public_ips
                .get(&key)
                .ok_or_else(|| not_found("public IP address", &display))?;
            let in_use = state.nics.values().any(|nic| {
                nic.ip_configurations
                    .iter()
                    .any(|cfg| cfg.public_ip_address_id.as_deref() == Some(pip.id.as_str()))
            });
            if in_use {
                return Err(PlatformError::with_code(
                    "PublicIPAddressInUse",
                    format!(
                        "Public IP address {} can not be deleted since it is still allocated to a resource.",
                        display
                    ),
                ));
            }
            state.public_ips.remove(&key);
            Ok(())
        })
    }

    async fn begin_create_or_update_network_interface(
        &self,
        resource_group: &str,
        name: &str,
        params: &NetworkInterfaceParams,
    ) -> PlatformResult<Poller<NetworkInterface>> {
        let rg = resource_group.to_string();
        let nic = NetworkInterface {
            id: self.resource_id(resource_group, "Microsoft.Network/networkInterfaces", name),
            name: name.to_string(),
            location: params.location.clone(),
            ip_configurations: params.ip_configurations.clone(),
        };

        self.begin(Operation::CreateNetworkInterface, name, move |state| {
            state.require_group(&rg)?;
            for pip_id in nic
                .ip_configurations
                .iter()
                .filter_map(|cfg| cfg.public_ip_address_id.as_deref())
            {
                let pip_name = super::resource_name(pip_id);
                if !state
                    .public_ips
                    .contains_key(&(rg.clone(), pip_name.to_string()))
                {
                    return Err(PlatformError::with_code(
                        "InvalidResourceReference",
                        format!("Resource {} referenced by the interface was not found.", pip_id),
                    ));
                }
            }
            state.nics.insert((rg, nic.name.clone()), nic.clone());
            Ok(nic)
        })
    }

    async fn get_network_interface(
        &self,
        resource_group: &str,
        name: &str,
    ) -> PlatformResult<NetworkInterface> {
        let key = (resource_group.to_string(), name.to_string());
        self.immediate(Operation::GetNetworkInterface, name, |state| {
            state
                .nics
                .get(&key)
                .cloned()
                .ok_or_else(|| not_found("network interface", name))
        })
    }

    async fn begin_create_or_update_virtual_machine(
        &self,
        resource_group: &str,
        name: &str,
        params: &VirtualMachineParams,
    ) -> PlatformResult<Poller<VirtualMachine>> {
        let rg = resource_group.to_string();
        let vm = VirtualMachine {
            id: self.resource_id(resource_group, "Microsoft.Compute/virtualMachines", name),
            name: name.to_string(),
            location: params.location.clone(),
            vm_size: params.vm_size.clone(),
            network_interface_ids: params.network_interface_ids.clone(),
        };

        self.begin(Operation::CreateVirtualMachine, name, move |state| {
            state.require_group(&rg)?;
            state.bind_dynamic_addresses(&rg, &vm.network_interface_ids);
            state.vms.insert((rg, vm.name.clone()), vm.clone());
            Ok(vm)
        })
    }

    async fn get_virtual_machine(
        &self,
        resource_group: &str,
        name: &str,
    ) -> PlatformResult<VirtualMachine> {
        let key = (resource_group.to_string(), name.to_string());
        self.immediate(Operation::GetVirtualMachine, name, |state| {
            state
                .vms
                .get(&key)
                .cloned()
                .ok_or_else(|| not_found("virtual machine", name))
        })
    }

    async fn begin_start(&self, resource_group: &str, name: &str) -> PlatformResult<Poller<()>> {
        let key = (resource_group.to_string(), name.to_string());
        let display = name.to_string();
        self.begin(Operation::StartVm, name, move |state| {
            state
                .vms
                .get(&key)
                .map(|_| ())
                .ok_or_else(|| not_found("virtual machine", &display))
        })
    }

    async fn begin_deallocate(
        &self,
        resource_group: &str,
        name: &str,
    ) -> PlatformResult<Poller<()>> {
        let key = (resource_group.to_string(), name.to_string());
        let display = name.to_string();
        self.begin(Operation::DeallocateVm, name, move |state| {
            state
                .vms
                .get(&key)
                .map(|_| ())
                .ok_or_else(|| not_found("virtual machine", &display))
        })
    }

    async fn begin_restart(&self, resource_group: &str, name: &str) -> PlatformResult<Poller<()>> {
        let key = (resource_group.to_string(), name.to_string());
        let display = name.to_string();
        self.begin(Operation::RestartVm, name, move |state| {
            state
                .vms
                .get(&key)
                .map(|_| ())
                .ok_or_else(|| not_found("virtual machine", &display))
        })
    }
}

/// Connector that hands out a shared [`MockPlatform`] and counts connections.
pub struct MockConnector {
    platform: Arc<MockPlatform>,
    connects: AtomicUsize,
    failure: Option<PlatformError>,
}

impl MockConnector {
    /// Connector returning `platform` on every connect.
    pub fn new(platform: Arc<MockPlatform>) -> Self {
        Self {
            platform,
            connects: AtomicUsize::new(0),
            failure: None,
        }
    }

    /// Connector whose every connect fails with `error`.
    pub fn failing(platform: Arc<MockPlatform>, error: PlatformError) -> Self {
        Self {
            platform,
            connects: AtomicUsize::new(0),
            failure: Some(error),
        }
    }

    /// Number of clients built so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformConnector for MockConnector {
    async fn connect(&self, _credentials: &Credentials) -> PlatformResult<Arc<dyn CloudPlatform>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(self.platform.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_long_running_operation_records_both_phases() {
        let platform = MockPlatform::new();
        platform
            .create_or_update_resource_group("rg", "westeurope")
            .await
            .unwrap();

        let poller = platform.begin_restart("rg", "missing").await.unwrap();
        assert!(poller.await.is_err());

        let phases: Vec<_> = platform
            .calls()
            .into_iter()
            .filter(|c| c.operation == Operation::RestartVm)
            .map(|c| c.phase)
            .collect();
        assert_eq!(phases, vec![CallPhase::Submitted, CallPhase::Failed]);
    }

    #[tokio::test]
    async fn test_submit_failure_is_injected() {
        let platform = MockPlatform::new();
        platform.fail_on(
            Operation::CreateResourceGroup,
            PlatformError::with_code("AuthorizationFailed", "denied"),
        );

        let err = platform
            .create_or_update_resource_group("rg", "westeurope")
            .await
            .unwrap_err();

        assert_eq!(err.code.as_deref(), Some("AuthorizationFailed"));
        assert!(!platform.has_resource_group("rg"));
    }

    #[tokio::test]
    async fn test_attached_public_ip_cannot_be_deleted() {
        let platform = MockPlatform::new();
        platform.seed_virtual_machine("rg", "vm1", "westeurope", true);

        let err = platform
            .begin_delete_public_ip("rg", "pip-vm1")
            .await
            .unwrap()
            .await
            .unwrap_err();

        assert_eq!(err.code.as_deref(), Some("PublicIPAddressInUse"));
        assert!(platform.public_ip("rg", "pip-vm1").is_some());
    }

    #[tokio::test]
    async fn test_delete_resource_group_cascades() {
        let platform = MockPlatform::new();
        platform.seed_virtual_machine("rg", "vm1", "westeurope", true);

        platform
            .begin_delete_resource_group("rg")
            .await
            .unwrap()
            .await
            .unwrap();

        assert!(!platform.has_resource_group("rg"));
        assert!(platform.public_ip("rg", "pip-vm1").is_none());
        assert!(platform.network_interface("rg", "nic-vm1").is_none());
    }

    #[tokio::test]
    async fn test_connector_counts_connections() {
        let connector = MockConnector::new(Arc::new(MockPlatform::new()));
        let creds = Credentials {
            tenant_id: "t".to_string(),
            client_id: "c".to_string(),
            client_secret: "s".to_string(),
            subscription_id: "sub".to_string(),
        };

        connector.connect(&creds).await.unwrap();
        connector.connect(&creds).await.unwrap();

        assert_eq!(connector.connect_count(), 2);
    }
}
