// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle actions on existing instances.

use std::fmt;
use std::str::FromStr;

use tracing::{info, instrument, warn};

use crate::error::UnknownAction;
use crate::platform::{CloudPlatform, Credentials, PlatformConnector, PlatformResult};

/// A lifecycle action, each mapping to exactly one platform operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VmAction {
    /// Power on.
    Start,
    /// Stop and deallocate compute.
    Stop,
    /// Reboot.
    Restart,
    /// Delete the instance's resource group.
    Delete,
}

impl VmAction {
    /// Keyword accepted from callers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Delete => "delete",
        }
    }

    /// Issue the operation and wait for it to complete.
    pub async fn dispatch(
        &self,
        platform: &dyn CloudPlatform,
        resource_group: &str,
        vm_name: &str,
    ) -> PlatformResult<()> {
        let poller = match self {
            Self::Start => platform.begin_start(resource_group, vm_name).await?,
            Self::Stop => platform.begin_deallocate(resource_group, vm_name).await?,
            Self::Restart => platform.begin_restart(resource_group, vm_name).await?,
            Self::Delete => platform.begin_delete_resource_group(resource_group).await?,
        };
        poller.await
    }
}

impl FromStr for VmAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            "delete" => Ok(Self::Delete),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for VmAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target of one action run.
#[derive(Clone)]
pub struct ActionJob {
    /// Platform credentials.
    pub credentials: Credentials,
    /// Resource group holding the instance.
    pub resource_group: String,
    /// Instance name.
    pub vm_name: String,
    /// Action to perform.
    pub action: VmAction,
}

impl fmt::Debug for ActionJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionJob")
            .field("resource_group", &self.resource_group)
            .field("vm_name", &self.vm_name)
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

/// Run one action, logging the outcome.
#[instrument(
    skip_all,
    fields(action = %job.action, resource_group = %job.resource_group, vm_name = %job.vm_name)
)]
pub async fn run_action(connector: &dyn PlatformConnector, job: ActionJob) {
    let platform = match connector.connect(&job.credentials).await {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "Action failed to connect");
            return;
        }
    };

    match job
        .action
        .dispatch(platform.as_ref(), &job.resource_group, &job.vm_name)
        .await
    {
        Ok(()) => info!("Action completed"),
        Err(e) => warn!(error = %e, "Action failed"),
    }
}
