// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded background execution for workflows.
//!
//! Every workflow runs on its own tokio task and holds one semaphore permit
//! for its whole lifetime. When all permits are taken, new work is rejected
//! with [`RunnerError::Saturated`] rather than queued.
//!
//! A supervisor task awaits each workflow's `JoinHandle`, so panics are logged
//! in one place and the permit and registry entry are always released. A
//! workflow that owns durable state passes an on-panic hook to settle it.
//!
//! Submitters that must record state before the workflow starts reserve a
//! [`WorkflowSlot`] first and only then write, so a rejected submission leaves
//! nothing behind.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{self, BoxFuture};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, error, info, warn};

use crate::error::RunnerError;

/// Process-local handle for a running workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkflowId(u64);

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wf-{}", self.0)
    }
}

/// What a workflow does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowKind {
    /// Instance provisioning with rollback.
    Provision,
    /// Lifecycle action on an existing instance.
    Action,
    /// Public address rotation.
    Rotation,
}

impl WorkflowKind {
    /// Short name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provision => "provision",
            Self::Action => "action",
            Self::Rotation => "rotation",
        }
    }
}

/// Snapshot of one running workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowInfo {
    /// Workflow handle.
    pub id: WorkflowId,
    /// Workflow kind.
    pub kind: WorkflowKind,
    /// Free-form label, e.g. the task ID or target instance.
    pub label: String,
    /// When the workflow was spawned.
    pub started_at: DateTime<Utc>,
}

struct RunnerInner {
    semaphore: Arc<Semaphore>,
    limit: usize,
    next_id: AtomicU64,
    registry: Mutex<HashMap<WorkflowId, WorkflowInfo>>,
    drained: Notify,
}

impl RunnerInner {
    fn registry(&self) -> MutexGuard<'_, HashMap<WorkflowId, WorkflowInfo>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Spawns workflows in the background under a concurrency limit.
#[derive(Clone)]
pub struct WorkflowRunner {
    inner: Arc<RunnerInner>,
}

impl fmt::Debug for WorkflowRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowRunner")
            .field("limit", &self.inner.limit)
            .field("active", &self.active_count())
            .finish()
    }
}

impl WorkflowRunner {
    /// Create a runner allowing at most `limit` concurrent workflows.
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                semaphore: Arc::new(Semaphore::new(limit)),
                limit,
                next_id: AtomicU64::new(1),
                registry: Mutex::new(HashMap::new()),
                drained: Notify::new(),
            }),
        }
    }

    /// Configured concurrency limit.
    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Reserve capacity for one workflow without starting it.
    ///
    /// Dropping the slot unused gives the capacity back.
    pub fn reserve(&self) -> Result<WorkflowSlot, RunnerError> {
        match self.inner.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(WorkflowSlot {
                permit,
                inner: self.inner.clone(),
            }),
            Err(TryAcquireError::NoPermits) => Err(RunnerError::Saturated {
                limit: self.inner.limit,
            }),
            Err(TryAcquireError::Closed) => Err(RunnerError::ShuttingDown),
        }
    }

    /// Reserve a slot and spawn `workflow` in it.
    pub fn submit<F>(
        &self,
        kind: WorkflowKind,
        label: impl Into<String>,
        workflow: F,
    ) -> Result<WorkflowId, RunnerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Ok(self.reserve()?.spawn(kind, label, workflow))
    }

    /// Number of workflows currently running.
    pub fn active_count(&self) -> usize {
        self.inner.registry().len()
    }

    /// Running workflows ordered by spawn order.
    pub fn active_workflows(&self) -> Vec<WorkflowInfo> {
        let mut workflows: Vec<_> = self.inner.registry().values().cloned().collect();
        workflows.sort_by_key(|w| w.id);
        workflows
    }

    /// Stop accepting work and wait up to `timeout` for running workflows.
    ///
    /// Returns `true` if every workflow finished in time. Workflows still
    /// running after the timeout are left to finish on their own.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.semaphore.close();
        info!(
            active = self.active_count(),
            timeout_secs = timeout.as_secs(),
            "Workflow runner shutting down"
        );

        let drain = async {
            loop {
                let notified = self.inner.drained.notified();
                if self.active_count() == 0 {
                    return;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(timeout, drain).await {
            Ok(()) => {
                info!("Workflow runner drained");
                true
            }
            Err(_) => {
                warn!(
                    remaining = self.active_count(),
                    "Workflow runner shutdown timed out"
                );
                false
            }
        }
    }
}

/// Reserved capacity for one workflow.
pub struct WorkflowSlot {
    permit: OwnedSemaphorePermit,
    inner: Arc<RunnerInner>,
}

impl fmt::Debug for WorkflowSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowSlot").finish_non_exhaustive()
    }
}

impl WorkflowSlot {
    /// Spawn `workflow` in this slot and return immediately.
    pub fn spawn<F>(self, kind: WorkflowKind, label: impl Into<String>, workflow: F) -> WorkflowId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn_with_on_panic(kind, label, workflow, || future::ready(()).boxed())
    }

    /// Spawn `workflow` and run `on_panic` if it panics.
    ///
    /// The hook runs on the supervisor before the slot is released, so the
    /// workflow still counts as active until the hook completes.
    pub fn spawn_with_on_panic<F, H>(
        self,
        kind: WorkflowKind,
        label: impl Into<String>,
        workflow: F,
        on_panic: H,
    ) -> WorkflowId
    where
        F: Future<Output = ()> + Send + 'static,
        H: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        let WorkflowSlot { permit, inner } = self;
        let id = WorkflowId(inner.next_id.fetch_add(1, Ordering::Relaxed));
        let label = label.into();

        inner.registry().insert(
            id,
            WorkflowInfo {
                id,
                kind,
                label: label.clone(),
                started_at: Utc::now(),
            },
        );
        debug!(workflow_id = %id, kind = kind.as_str(), label = %label, "Workflow spawned");

        let handle = tokio::spawn(workflow);

        tokio::spawn(async move {
            match handle.await {
                Ok(()) => {
                    debug!(workflow_id = %id, kind = kind.as_str(), "Workflow finished");
                }
                Err(e) if e.is_panic() => {
                    error!(
                        workflow_id = %id,
                        kind = kind.as_str(),
                        label = %label,
                        "Workflow panicked"
                    );
                    on_panic().await;
                }
                Err(e) => {
                    warn!(workflow_id = %id, kind = kind.as_str(), error = %e, "Workflow aborted");
                }
            }

            let now_empty = {
                let mut registry = inner.registry();
                registry.remove(&id);
                registry.is_empty()
            };
            drop(permit);
            if now_empty {
                inner.drained.notify_waiters();
            }
        });

        id
    }
}
