// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for vmforge-core integration tests.
//!
//! Provides TestContext wiring a control plane to an in-memory store and a
//! recording mock platform.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use vmforge_core::config::Config;
use vmforge_core::control::ControlPlane;
use vmforge_core::error::{StoreError, StoreResult};
use vmforge_core::persistence::{SqliteTaskStore, TaskStore};
use vmforge_core::platform::{Credentials, IpAllocation, MockConnector, MockPlatform};
use vmforge_core::task::{TaskPoll, TaskRecord, TaskStatus};
use vmforge_core::workflow::ProvisionRequest;

/// Control plane plus handles on its collaborators.
pub struct TestContext {
    pub control: ControlPlane,
    pub store: Arc<dyn TaskStore>,
    pub platform: Arc<MockPlatform>,
    pub connector: Arc<MockConnector>,
}

impl TestContext {
    /// In-memory store, fresh mock platform, room for 8 workflows.
    pub async fn new() -> Self {
        Self::with_store(Arc::new(memory_store().await), 8).await
    }

    /// Use `store` and allow at most `limit` concurrent workflows.
    pub async fn with_store(store: Arc<dyn TaskStore>, limit: usize) -> Self {
        let platform = Arc::new(MockPlatform::new());
        let connector = Arc::new(MockConnector::new(platform.clone()));
        Self::assemble(store, platform, connector, limit)
    }

    /// Use a prepared connector, e.g. one that fails to connect.
    pub async fn with_connector(connector: MockConnector, platform: Arc<MockPlatform>) -> Self {
        let store: Arc<dyn TaskStore> = Arc::new(memory_store().await);
        Self::assemble(store, platform, Arc::new(connector), 8)
    }

    fn assemble(
        store: Arc<dyn TaskStore>,
        platform: Arc<MockPlatform>,
        connector: Arc<MockConnector>,
        limit: usize,
    ) -> Self {
        let control = ControlPlane::builder()
            .store(store.clone())
            .connector(connector.clone())
            .config(Config {
                max_concurrent_workflows: limit,
                ..Config::default()
            })
            .build()
            .expect("Failed to build control plane");

        Self {
            control,
            store,
            platform,
            connector,
        }
    }

    /// Poll until the task is terminal, panicking after five seconds.
    pub async fn wait_for_terminal(&self, task_id: &str) -> (TaskStatus, String) {
        for _ in 0..500 {
            match self.control.poll(task_id).await.expect("poll failed") {
                TaskPoll::Found { status, result } if status.is_terminal() => {
                    return (status, result.unwrap_or_default());
                }
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
        panic!("task {} never reached a terminal state", task_id);
    }

    /// Wait until no workflow is running.
    pub async fn wait_idle(&self) {
        for _ in 0..500 {
            if self.control.runner().active_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("workflows still running");
    }
}

pub async fn memory_store() -> SqliteTaskStore {
    SqliteTaskStore::connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory store")
}

pub fn credentials() -> Credentials {
    Credentials {
        tenant_id: "11111111-1111-1111-1111-111111111111".to_string(),
        client_id: "22222222-2222-2222-2222-222222222222".to_string(),
        client_secret: "client-secret".to_string(),
        subscription_id: "33333333-3333-3333-3333-333333333333".to_string(),
    }
}

pub fn request(os_image: &str) -> ProvisionRequest {
    ProvisionRequest {
        region: "West Europe".to_string(),
        vm_size: "Standard_B1s".to_string(),
        disk_size: 30,
        os_image: os_image.to_string(),
        ip_type: IpAllocation::Static,
        user_data: None,
    }
}

/// Store whose transitions wait until the gate is opened.
///
/// Lets a test observe a task in `pending` before its workflow moves it on.
pub struct GatedStore {
    inner: SqliteTaskStore,
    gate: Arc<Semaphore>,
    gate_creates: bool,
}

impl GatedStore {
    pub async fn closed() -> Self {
        Self {
            inner: memory_store().await,
            gate: Arc::new(Semaphore::new(0)),
            gate_creates: false,
        }
    }

    /// Like [`GatedStore::closed`], but task creation waits too.
    pub async fn closed_with_creates() -> Self {
        Self {
            gate_creates: true,
            ..Self::closed().await
        }
    }

    async fn pass(&self) -> StoreResult<()> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| StoreError::Database {
                operation: "gate".to_string(),
                details: e.to_string(),
            })?;
        Ok(())
    }

    /// Let every pending and future transition through.
    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl TaskStore for GatedStore {
    async fn create(&self, task_id: &str) -> StoreResult<()> {
        if self.gate_creates {
            self.pass().await?;
        }
        self.inner.create(task_id).await
    }

    async fn transition(
        &self,
        task_id: &str,
        next: TaskStatus,
        result: Option<&str>,
    ) -> StoreResult<()> {
        self.pass().await?;
        self.inner.transition(task_id, next, result).await
    }

    async fn get(&self, task_id: &str) -> StoreResult<Option<TaskRecord>> {
        self.inner.get(task_id).await
    }

    async fn fail_interrupted(&self, reason: &str) -> StoreResult<u64> {
        self.inner.fail_interrupted(reason).await
    }

    async fn health_check(&self) -> StoreResult<bool> {
        self.inner.health_check().await
    }
}
