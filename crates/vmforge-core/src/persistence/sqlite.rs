// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed task store.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use sqlx::sqlite::SqlitePoolOptions;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::migrations;
use crate::task::{TaskRecord, TaskStatus};

use super::{TaskRow, TaskStore, map_insert_error, rejected_transition, result_for};

/// SQLite-backed task store.
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Create a store from an existing, already migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite URL and run migrations.
    ///
    /// In-memory databases are private to one connection, so the pool is
    /// limited to a single connection for `sqlite::memory:` URLs.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let in_memory = url.contains(":memory:");
        let mut options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            // Closing the only connection would drop the database.
            options = options.idle_timeout(None).max_lifetime(None);
        }

        let pool = options
            .connect(url)
            .await
            .map_err(|e| StoreError::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {}: {}", url, e),
            })?;

        migrations::run_sqlite(&pool)
            .await
            .map_err(|e| StoreError::Database {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// Open (creating if needed) a database file and run migrations.
    ///
    /// Parent directories are created when missing.
    pub async fn from_path(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Database {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url).await
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create(&self, task_id: &str) -> StoreResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO tasks (id, status, result, created_at, updated_at)
            VALUES (?1, 'pending', NULL, ?2, ?2)
            "#,
        )
        .bind(task_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(task_id, e))?;

        debug!(task_id, "Task created");
        Ok(())
    }

    async fn transition(
        &self,
        task_id: &str,
        next: TaskStatus,
        result: Option<&str>,
    ) -> StoreResult<()> {
        let allowed = next.predecessors();

        if !allowed.is_empty() {
            let mut query = QueryBuilder::<Sqlite>::new("UPDATE tasks SET status = ");
            query
                .push_bind(next.as_str())
                .push(", result = COALESCE(")
                .push_bind(result_for(next, result))
                .push(", result), updated_at = ")
                .push_bind(Utc::now())
                .push(" WHERE id = ")
                .push_bind(task_id)
                .push(" AND status IN (");
            let mut statuses = query.separated(", ");
            for status in allowed {
                statuses.push_bind(status.as_str());
            }
            statuses.push_unseparated(")");

            let updated = query
                .build()
                .execute(&self.pool)
                .await?
                .rows_affected();

            if updated == 1 {
                debug!(task_id, status = next.as_str(), "Task transitioned");
                return Ok(());
            }
        }

        let current = self.get(task_id).await?.map(|r| r.status);
        Err(rejected_transition(task_id, current, next))
    }

    async fn get(&self, task_id: &str) -> StoreResult<Option<TaskRecord>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, status, result, created_at, updated_at
            FROM tasks
            WHERE id = ?1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TaskRecord::try_from).transpose()
    }

    async fn fail_interrupted(&self, reason: &str) -> StoreResult<u64> {
        let affected = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failure',
                result = ?1,
                updated_at = ?2
            WHERE status IN ('pending', 'running')
            "#,
        )
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected)
    }

    async fn health_check(&self) -> StoreResult<bool> {
        let row: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}
