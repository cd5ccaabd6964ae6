// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task store interface and backends.
//!
//! The store is the single source of truth for task state and the only state
//! shared between workflows. Every write is a single conditional statement, so
//! concurrent writers to the same row serialize in the database.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresTaskStore;
pub use self::sqlite::SqliteTaskStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{StoreError, StoreResult};
use crate::task::{TaskRecord, TaskStatus};

/// Durable task registry used by workflows and pollers.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task in `pending`.
    ///
    /// Fails with [`StoreError::DuplicateTask`] if the identity exists.
    async fn create(&self, task_id: &str) -> StoreResult<()>;

    /// Move a task to `next`, recording `result` when `next` is terminal.
    ///
    /// Fails with [`StoreError::UnknownTask`] for a missing task,
    /// [`StoreError::TerminalTask`] if the task already finished, and
    /// [`StoreError::InvalidTransition`] for a backwards move.
    async fn transition(
        &self,
        task_id: &str,
        next: TaskStatus,
        result: Option<&str>,
    ) -> StoreResult<()>;

    /// Fetch a task. `None` means no task has this identity.
    async fn get(&self, task_id: &str) -> StoreResult<Option<TaskRecord>>;

    /// Fail every task still `pending` or `running`.
    ///
    /// Called on startup: a workflow does not survive a restart, so any task
    /// it owned can never reach a terminal state on its own.
    async fn fail_interrupted(&self, reason: &str) -> StoreResult<u64>;

    /// Check database connectivity.
    async fn health_check(&self) -> StoreResult<bool>;
}

/// Raw row shape shared by the SQL backends.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TaskRow {
    pub id: String,
    pub status: String,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::parse(&row.status).ok_or_else(|| StoreError::Database {
            operation: "decode".to_string(),
            details: format!("unknown status '{}' for task '{}'", row.status, row.id),
        })?;

        Ok(TaskRecord {
            id: row.id,
            status,
            result: row.result,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Map an insert failure, turning primary key conflicts into `DuplicateTask`.
pub(crate) fn map_insert_error(task_id: &str, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err
        && db_err.is_unique_violation()
    {
        return StoreError::DuplicateTask {
            task_id: task_id.to_string(),
        };
    }
    StoreError::Database {
        operation: "insert".to_string(),
        details: err.to_string(),
    }
}

/// Explain why a conditional update touched no row.
pub(crate) fn rejected_transition(
    task_id: &str,
    current: Option<TaskStatus>,
    next: TaskStatus,
) -> StoreError {
    match current {
        None => StoreError::UnknownTask {
            task_id: task_id.to_string(),
        },
        Some(status) if status.is_terminal() => StoreError::TerminalTask {
            task_id: task_id.to_string(),
            status,
        },
        Some(from) => StoreError::InvalidTransition {
            task_id: task_id.to_string(),
            from,
            to: next,
        },
    }
}

/// Result text is only written on entry into a terminal state.
pub(crate) fn result_for(next: TaskStatus, result: Option<&str>) -> Option<&str> {
    if next.is_terminal() { result } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_transition_classification() {
        assert!(matches!(
            rejected_transition("t", None, TaskStatus::Running),
            StoreError::UnknownTask { .. }
        ));
        assert!(matches!(
            rejected_transition("t", Some(TaskStatus::Success), TaskStatus::Failure),
            StoreError::TerminalTask {
                status: TaskStatus::Success,
                ..
            }
        ));
        assert!(matches!(
            rejected_transition("t", Some(TaskStatus::Running), TaskStatus::Running),
            StoreError::InvalidTransition { .. }
        ));
    }

    #[test]
    fn test_result_dropped_for_non_terminal_states() {
        assert_eq!(result_for(TaskStatus::Running, Some("x")), None);
        assert_eq!(result_for(TaskStatus::Failure, Some("x")), Some("x"));
    }
}
