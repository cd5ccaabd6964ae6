// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Submission and polling surface for the request layer.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vmforge_core::config::Config;
//! use vmforge_core::control::ControlPlane;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     vmforge_core::telemetry::init_tracing();
//!     let config = Config::from_env()?;
//!     let control = ControlPlane::from_config(config, Arc::new(my_connector)).await?;
//!     control.recover_interrupted().await?;
//!
//!     let task_id = control.submit_provision(credentials, request).await?;
//!     let poll = control.poll(&task_id).await?;
//!
//!     control.shutdown(control.config().shutdown_timeout).await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{StoreError, SubmitError};
use crate::naming::{ResourceNames, generate_password};
use crate::persistence::{PostgresTaskStore, SqliteTaskStore, TaskStore};
use crate::platform::{Credentials, PlatformConnector};
use crate::runner::{WorkflowKind, WorkflowRunner};
use crate::task::{TaskPoll, new_task_id};
use crate::workflow::{
    ActionJob, ProvisionJob, ProvisionRequest, RotationJob, VmAction, record_crash, run_action,
    run_provision, run_rotation,
};

/// Result text recorded for tasks cut off by a restart.
pub const INTERRUPTED_REASON: &str = "virtual machine creation interrupted by service restart";

/// Builder for creating a [`ControlPlane`].
pub struct ControlPlaneBuilder {
    store: Option<Arc<dyn TaskStore>>,
    connector: Option<Arc<dyn PlatformConnector>>,
    config: Config,
}

impl std::fmt::Debug for ControlPlaneBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlaneBuilder")
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("connector", &self.connector.as_ref().map(|_| "..."))
            .field("config", &self.config)
            .finish()
    }
}

impl Default for ControlPlaneBuilder {
    fn default() -> Self {
        Self {
            store: None,
            connector: None,
            config: Config::default(),
        }
    }
}

impl ControlPlaneBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the task store (required).
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the platform connector (required).
    pub fn connector(mut self, connector: Arc<dyn PlatformConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Set limits and instance defaults.
    ///
    /// Default: [`Config::default`]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Build the control plane.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<ControlPlane> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("task store is required"))?;
        let connector = self
            .connector
            .ok_or_else(|| anyhow::anyhow!("platform connector is required"))?;
        if self.config.max_concurrent_workflows == 0 {
            anyhow::bail!("max_concurrent_workflows must be positive");
        }

        Ok(ControlPlane {
            store,
            connector,
            runner: WorkflowRunner::new(self.config.max_concurrent_workflows),
            config: self.config,
        })
    }
}

/// Accepts workflow submissions and answers status polls.
pub struct ControlPlane {
    store: Arc<dyn TaskStore>,
    connector: Arc<dyn PlatformConnector>,
    runner: WorkflowRunner,
    config: Config,
}

impl std::fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlane")
            .field("store", &"...")
            .field("connector", &"...")
            .field("runner", &self.runner)
            .field("config", &self.config)
            .finish()
    }
}

impl ControlPlane {
    /// Create a builder.
    pub fn builder() -> ControlPlaneBuilder {
        ControlPlaneBuilder::new()
    }

    /// Open the store named by `config.database_url` and build a control plane.
    ///
    /// URLs starting with `postgres` select PostgreSQL; anything else is
    /// treated as a SQLite URL.
    pub async fn from_config(
        config: Config,
        connector: Arc<dyn PlatformConnector>,
    ) -> Result<Self> {
        let store: Arc<dyn TaskStore> = if config.database_url.starts_with("postgres") {
            Arc::new(PostgresTaskStore::connect(&config.database_url).await?)
        } else {
            Arc::new(SqliteTaskStore::connect(&config.database_url).await?)
        };

        ControlPlaneBuilder::new()
            .store(store)
            .connector(connector)
            .config(config)
            .build()
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The task store.
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// The workflow runner.
    pub fn runner(&self) -> &WorkflowRunner {
        &self.runner
    }

    /// Submit a provisioning request under a fresh task identity.
    pub async fn submit_provision(
        &self,
        credentials: Credentials,
        request: ProvisionRequest,
    ) -> Result<String, SubmitError> {
        self.submit_provision_with_id(new_task_id(), credentials, request)
            .await
    }

    /// Submit a provisioning request under a caller-chosen task identity.
    ///
    /// The task is `pending` by the time this returns. Nothing is recorded
    /// when the request is invalid or the runner is full.
    ///
    /// The task row is written by the spawned workflow, which reports back
    /// before doing anything else. Dropping the returned future after the
    /// slot is reserved does not orphan the row: the workflow still runs.
    pub async fn submit_provision_with_id(
        &self,
        task_id: impl Into<String>,
        credentials: Credentials,
        request: ProvisionRequest,
    ) -> Result<String, SubmitError> {
        let task_id = task_id.into();
        request.validate()?;

        let slot = self.runner.reserve()?;

        let job = ProvisionJob {
            names: ResourceNames::generate(&request.region, &task_id, Utc::now()),
            task_id: task_id.clone(),
            credentials,
            admin_username: self.config.admin_username.clone(),
            admin_password: generate_password(self.config.password_length),
            request,
        };

        let vm_name = job.names.vm_name.clone();
        let on_panic = {
            let store = self.store.clone();
            let task_id = task_id.clone();
            let resource_group = job.names.resource_group.clone();
            move || {
                async move {
                    record_crash(store.as_ref(), &task_id, &resource_group).await;
                }
                .boxed()
            }
        };

        let (created_tx, created_rx) = oneshot::channel();
        let store = self.store.clone();
        let connector = self.connector.clone();
        slot.spawn_with_on_panic(
            WorkflowKind::Provision,
            task_id.clone(),
            async move {
                let created = store.create(&job.task_id).await;
                let registered = created.is_ok();
                let _ = created_tx.send(created);
                if registered {
                    run_provision(store.as_ref(), connector.as_ref(), job).await;
                }
            },
            on_panic,
        );

        created_rx.await.map_err(|_| StoreError::Database {
            operation: "create".to_string(),
            details: "task registration aborted".to_string(),
        })??;

        info!(task_id = %task_id, vm_name = %vm_name, "Provisioning submitted");
        Ok(task_id)
    }

    /// Submit a lifecycle action. Unknown keywords are rejected.
    pub fn submit_action(
        &self,
        credentials: Credentials,
        resource_group: &str,
        vm_name: &str,
        action: &str,
    ) -> Result<(), SubmitError> {
        let action: VmAction = action.parse()?;
        let job = ActionJob {
            credentials,
            resource_group: resource_group.to_string(),
            vm_name: vm_name.to_string(),
            action,
        };

        let connector = self.connector.clone();
        self.runner.submit(
            WorkflowKind::Action,
            format!("{} {}", action, vm_name),
            async move {
                run_action(connector.as_ref(), job).await;
            },
        )?;
        Ok(())
    }

    /// Submit a public address rotation.
    pub fn submit_rotation(
        &self,
        credentials: Credentials,
        resource_group: &str,
        vm_name: &str,
    ) -> Result<(), SubmitError> {
        let job = RotationJob {
            credentials,
            resource_group: resource_group.to_string(),
            vm_name: vm_name.to_string(),
        };

        let connector = self.connector.clone();
        self.runner
            .submit(WorkflowKind::Rotation, vm_name.to_string(), async move {
                run_rotation(connector.as_ref(), job).await;
            })?;
        Ok(())
    }

    /// Current status of a task. Unknown identities yield [`TaskPoll::NotFound`].
    pub async fn poll(&self, task_id: &str) -> Result<TaskPoll, StoreError> {
        Ok(self.store.get(task_id).await?.into())
    }

    /// Fail every task left unfinished by a previous process.
    ///
    /// Call once at startup, before accepting submissions.
    pub async fn recover_interrupted(&self) -> Result<u64, StoreError> {
        let failed = self.store.fail_interrupted(INTERRUPTED_REASON).await?;
        if failed > 0 {
            warn!(count = failed, "Failed tasks interrupted by restart");
        }
        Ok(failed)
    }

    /// Stop accepting work and wait up to `timeout` for running workflows.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.runner.shutdown(timeout).await
    }
}
