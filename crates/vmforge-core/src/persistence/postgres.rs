// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed task store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::migrations;
use crate::task::{TaskRecord, TaskStatus};

use super::{TaskRow, TaskStore, map_insert_error, rejected_transition, result_for};

/// PostgreSQL-backed task store.
#[derive(Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    /// Create a store from an existing, already migrated pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to PostgreSQL and run migrations.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|e| StoreError::Database {
                operation: "connect".to_string(),
                details: e.to_string(),
            })?;

        migrations::run_postgres(&pool)
            .await
            .map_err(|e| StoreError::Database {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn create(&self, task_id: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, status, result, created_at, updated_at)
            VALUES ($1, 'pending', NULL, $2, $2)
            "#,
        )
        .bind(task_id)
        .bind(Utc::now())
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
        let allowed: Vec<&str> = next.predecessors().iter().map(|s| s.as_str()).collect();

        if !allowed.is_empty() {
            let updated = sqlx::query(
                r#"
                UPDATE tasks
                SET status = $1,
                    result = COALESCE($2, result),
                    updated_at = $3
                WHERE id = $4
                  AND status = ANY($5)
                "#,
            )
            .bind(next.as_str())
            .bind(result_for(next, result))
            .bind(Utc::now())
            .bind(task_id)
            .bind(&allowed)
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
            WHERE id = $1
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
                result = $1,
                updated_at = $2
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
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::new_task_id;

    /// Skip unless a PostgreSQL URL is configured.
    macro_rules! skip_if_no_db {
        () => {
            match std::env::var("TEST_VMFORGE_DATABASE_URL") {
                Ok(url) => url,
                Err(_) => {
                    eprintln!("Skipping test: TEST_VMFORGE_DATABASE_URL not set");
                    return;
                }
            }
        };
    }

    #[tokio::test]
    async fn test_postgres_lifecycle_and_guards() {
        let url = skip_if_no_db!();
        let store = PostgresTaskStore::connect(&url).await.unwrap();
        let task_id = new_task_id();

        store.create(&task_id).await.unwrap();
        assert!(matches!(
            store.create(&task_id).await,
            Err(StoreError::DuplicateTask { .. })
        ));

        store
            .transition(&task_id, TaskStatus::Running, None)
            .await
            .unwrap();
        store
            .transition(&task_id, TaskStatus::Failure, Some("boom"))
            .await
            .unwrap();
        assert!(matches!(
            store
                .transition(&task_id, TaskStatus::Success, Some("late"))
                .await,
            Err(StoreError::TerminalTask { .. })
        ));

        let task = store.get(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failure);
        assert_eq!(task.result.as_deref(), Some("boom"));

        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(&task_id)
            .execute(&store.pool)
            .await
            .ok();
    }
}
