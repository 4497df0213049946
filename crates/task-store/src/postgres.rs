//! PostgreSQL task storage backend.
//!
//! Production backend for persistent task storage shared across multiple
//! service instances. Five logical tables keyed by `task_id`, one-to-one
//! from `tasks` to each child, cascade-deleted with the parent.

use crate::error::map_sqlx_error;
use crate::state_machine;
use crate::traits::TaskStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use tracing::{debug, info};

use task_types::{
    CoreError, ListTasksFilter, Task, TaskId, TaskListPage, TaskMetadata, TaskPayload, TaskResult,
    TaskState, TaskStatus, TaskView, MAX_LIST_LIMIT,
};

#[derive(Debug, Clone)]
pub struct PostgresTaskConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_secs: u64,
    pub create_tables_if_missing: bool,
}

impl Default for PostgresTaskConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost:5432/task_hub".to_string(),
            max_connections: 20,
            min_connections: 2,
            connection_timeout_secs: 30,
            create_tables_if_missing: true,
        }
    }
}

pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub async fn new(config: PostgresTaskConfig) -> Result<Self, CoreError> {
        info!(database_url = %mask_db_url(&config.database_url), "connecting to postgres task store");

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.connection_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(map_sqlx_error)?;

        let store = Self { pool };
        if config.create_tables_if_missing {
            store.migrate().await?;
        }
        Ok(store)
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn migrate(&self) -> Result<(), CoreError> {
        debug!("running postgres task store migrations");
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                task_type TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_payloads (
                task_id TEXT PRIMARY KEY REFERENCES tasks(task_id) ON DELETE CASCADE,
                payload JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_metadata (
                task_id TEXT PRIMARY KEY REFERENCES tasks(task_id) ON DELETE CASCADE,
                created_at TIMESTAMPTZ,
                updated_at TIMESTAMPTZ,
                started_at TIMESTAMPTZ,
                finished_at TIMESTAMPTZ,
                custom JSONB NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_statuses (
                task_id TEXT PRIMARY KEY REFERENCES tasks(task_id) ON DELETE CASCADE,
                state TEXT NOT NULL,
                progress JSONB NOT NULL DEFAULT '{}',
                message TEXT,
                metrics JSONB NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_results (
                task_id TEXT PRIMARY KEY REFERENCES tasks(task_id) ON DELETE CASCADE,
                data JSONB NOT NULL,
                expires_at TIMESTAMPTZ,
                ttl_seconds BIGINT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_owner ON tasks (owner_id, task_id)")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn load_status(&self, task_id: TaskId) -> Result<TaskStatus, CoreError> {
        let row = sqlx::query(
            "SELECT state, progress, message, metrics FROM task_statuses WHERE task_id = $1",
        )
        .bind(task_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(CoreError::NotFound)?;
        status_from_row(&row)
    }
}

fn mask_db_url(url: &str) -> String {
    match url.split_once('@') {
        Some((_, rest)) => format!("***@{rest}"),
        None => url.to_string(),
    }
}

fn status_from_row(row: &PgRow) -> Result<TaskStatus, CoreError> {
    let state: String = row.try_get("state").map_err(map_sqlx_error)?;
    let progress: serde_json::Value = row.try_get("progress").map_err(map_sqlx_error)?;
    let message: Option<String> = row.try_get("message").map_err(map_sqlx_error)?;
    let metrics: serde_json::Value = row.try_get("metrics").map_err(map_sqlx_error)?;
    Ok(TaskStatus {
        state: parse_state(&state)?,
        progress: serde_json::from_value(progress).unwrap_or_default(),
        message,
        metrics: serde_json::from_value(metrics).unwrap_or_default(),
    })
}

fn parse_state(s: &str) -> Result<TaskState, CoreError> {
    match s {
        "QUEUED" => Ok(TaskState::Queued),
        "RUNNING" => Ok(TaskState::Running),
        "COMPLETED" => Ok(TaskState::Completed),
        "FAILED" => Ok(TaskState::Failed),
        "CANCELLED" => Ok(TaskState::Cancelled),
        other => Err(CoreError::Fatal(format!("unknown task state in store: {other}"))),
    }
}

fn state_str(s: TaskState) -> &'static str {
    match s {
        TaskState::Queued => "QUEUED",
        TaskState::Running => "RUNNING",
        TaskState::Completed => "COMPLETED",
        TaskState::Failed => "FAILED",
        TaskState::Cancelled => "CANCELLED",
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn create_task(
        &self,
        owner_id: &str,
        task_id: TaskId,
        payload: TaskPayload,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let task_type = payload.task_type().as_str();
        let inserted = sqlx::query(
            "INSERT INTO tasks (task_id, owner_id, task_type) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(task_id.to_string())
        .bind(owner_id)
        .bind(task_type)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        if inserted.rows_affected() == 0 {
            return Err(CoreError::Conflict);
        }

        let payload_json = serde_json::to_value(&payload)?;
        sqlx::query("INSERT INTO task_payloads (task_id, payload) VALUES ($1, $2)")
            .bind(task_id.to_string())
            .bind(payload_json)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO task_metadata (task_id, created_at, updated_at) VALUES ($1, $2, $2)",
        )
        .bind(task_id.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            "INSERT INTO task_statuses (task_id, state, progress, message, metrics) VALUES ($1, $2, '{}', NULL, '{}')",
        )
        .bind(task_id.to_string())
        .bind(state_str(TaskState::Queued))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_task(&self, owner_id: &str, task_id: TaskId) -> Result<Task, CoreError> {
        let row = sqlx::query("SELECT owner_id, task_type FROM tasks WHERE task_id = $1")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or(CoreError::NotFound)?;
        let row_owner: String = row.try_get("owner_id").map_err(map_sqlx_error)?;
        if row_owner != owner_id {
            return Err(CoreError::AccessDenied);
        }

        let payload_row = sqlx::query("SELECT payload FROM task_payloads WHERE task_id = $1")
            .bind(task_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let payload_json: serde_json::Value =
            payload_row.try_get("payload").map_err(map_sqlx_error)?;
        let payload: TaskPayload = serde_json::from_value(payload_json)?;

        let meta_row = sqlx::query(
            "SELECT created_at, updated_at, started_at, finished_at, custom FROM task_metadata WHERE task_id = $1",
        )
        .bind(task_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        let custom_json: serde_json::Value = meta_row.try_get("custom").map_err(map_sqlx_error)?;
        let metadata = TaskMetadata {
            created_at: meta_row.try_get("created_at").map_err(map_sqlx_error)?,
            updated_at: meta_row.try_get("updated_at").map_err(map_sqlx_error)?,
            started_at: meta_row.try_get("started_at").map_err(map_sqlx_error)?,
            finished_at: meta_row.try_get("finished_at").map_err(map_sqlx_error)?,
            custom: serde_json::from_value(custom_json).unwrap_or_default(),
        };

        let status = self.load_status(task_id).await?;

        let result_row = sqlx::query(
            "SELECT data, expires_at, ttl_seconds FROM task_results WHERE task_id = $1",
        )
        .bind(task_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        let result = match result_row {
            Some(r) => {
                let data: serde_json::Value = r.try_get("data").map_err(map_sqlx_error)?;
                Some(TaskResult {
                    task_id,
                    data,
                    expires_at: r.try_get("expires_at").map_err(map_sqlx_error)?,
                    ttl_seconds: r.try_get("ttl_seconds").map_err(map_sqlx_error)?,
                })
            }
            None => None,
        };

        Ok(Task { task_id, owner_id: row_owner, payload, status, metadata, result })
    }

    async fn get_status(&self, owner_id: &str, task_id: TaskId) -> Result<TaskStatus, CoreError> {
        Ok(self.get_task(owner_id, task_id).await?.status)
    }

    async fn get_result(
        &self,
        owner_id: &str,
        task_id: TaskId,
    ) -> Result<Option<TaskResult>, CoreError> {
        Ok(self.get_task(owner_id, task_id).await?.result)
    }

    async fn list_tasks(
        &self,
        owner_id: &str,
        filter: ListTasksFilter,
    ) -> Result<TaskListPage, CoreError> {
        let limit = filter.limit.clamp(1, MAX_LIST_LIMIT) as i64;
        let rows = sqlx::query(
            r#"
            SELECT t.task_id, t.owner_id, t.task_type, s.state, m.created_at, m.updated_at
            FROM tasks t
            JOIN task_statuses s ON s.task_id = t.task_id
            JOIN task_metadata m ON m.task_id = t.task_id
            WHERE t.owner_id = $1
              AND ($2::text IS NULL OR t.task_type = $2)
              AND ($3::text IS NULL OR s.state = $3)
            ORDER BY t.task_id ASC
            OFFSET $4 LIMIT $5
            "#,
        )
        .bind(owner_id)
        .bind(filter.task_type.map(|t| t.as_str().to_string()))
        .bind(filter.state.map(state_str))
        .bind(filter.offset as i64)
        .bind(limit + 1)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let has_more = rows.len() as i64 > limit;
        let mut tasks = Vec::new();
        for row in rows.iter().take(limit as usize) {
            let task_id: String = row.try_get("task_id").map_err(map_sqlx_error)?;
            let state: String = row.try_get("state").map_err(map_sqlx_error)?;
            let task_type: String = row.try_get("task_type").map_err(map_sqlx_error)?;
            tasks.push(TaskView {
                task_id: TaskId::from_str(&task_id)
                    .map_err(|e| CoreError::Fatal(e.to_string()))?,
                owner_id: row.try_get::<String, _>("owner_id").map_err(map_sqlx_error)?,
                task_type: task_type_from_str(&task_type)?,
                state: parse_state(&state)?,
                created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
                updated_at: row.try_get("updated_at").map_err(map_sqlx_error)?,
            });
        }
        let next_offset = if has_more { Some(filter.offset + tasks.len() as u32) } else { None };
        Ok(TaskListPage { tasks, next_offset })
    }

    async fn update_task_status(&self, task_id: TaskId, status: TaskStatus) -> Result<(), CoreError> {
        let current = self.load_status(task_id).await?;
        if !state_machine::should_apply(current.state, status.state) {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query(
            "UPDATE task_statuses SET state = $2, progress = $3, message = $4, metrics = $5 WHERE task_id = $1",
        )
        .bind(task_id.to_string())
        .bind(state_str(status.state))
        .bind(serde_json::to_value(&status.progress)?)
        .bind(&status.message)
        .bind(serde_json::to_value(&status.metrics)?)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if status.state.is_terminal() {
            sqlx::query(
                "UPDATE task_metadata SET updated_at = $2, finished_at = $2 WHERE task_id = $1",
            )
            .bind(task_id.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        } else {
            let set_started = matches!(status.state, TaskState::Running);
            sqlx::query(
                "UPDATE task_metadata SET updated_at = $2, started_at = COALESCE(started_at, CASE WHEN $3 THEN $2 END) WHERE task_id = $1",
            )
            .bind(task_id.to_string())
            .bind(now)
            .bind(set_started)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn set_task_result(
        &self,
        task_id: TaskId,
        result: TaskResult,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query(
            r#"
            INSERT INTO task_results (task_id, data, expires_at, ttl_seconds)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (task_id) DO UPDATE SET data = $2, expires_at = $3, ttl_seconds = $4
            "#,
        )
        .bind(task_id.to_string())
        .bind(&result.data)
        .bind(result.expires_at)
        .bind(result.ttl_seconds)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if let Some(ts) = finished_at {
            sqlx::query("UPDATE task_metadata SET finished_at = $2, updated_at = $2 WHERE task_id = $1")
                .bind(task_id.to_string())
                .bind(ts)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn recover_stuck_tasks(&self, max_age_ms: u64) -> Result<Vec<TaskId>, CoreError> {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(max_age_ms as i64);
        let rows = sqlx::query(
            r#"
            SELECT t.task_id FROM tasks t
            JOIN task_statuses s ON s.task_id = t.task_id
            JOIN task_metadata m ON m.task_id = t.task_id
            WHERE s.state NOT IN ('COMPLETED', 'FAILED', 'CANCELLED') AND m.updated_at < $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut recovered = Vec::new();
        for row in rows {
            let task_id_str: String = row.try_get("task_id").map_err(map_sqlx_error)?;
            let task_id =
                TaskId::from_str(&task_id_str).map_err(|e| CoreError::Fatal(e.to_string()))?;
            self.update_task_status(task_id, TaskStatus::failed("service restarted — task interrupted"))
                .await?;
            recovered.push(task_id);
        }
        Ok(recovered)
    }
}

fn task_type_from_str(s: &str) -> Result<task_types::TaskType, CoreError> {
    match s {
        "COMPUTE_PI" => Ok(task_types::TaskType::ComputePi),
        "DOCUMENT_ANALYSIS" => Ok(task_types::TaskType::DocumentAnalysis),
        other => Err(CoreError::Fatal(format!("unknown task type in store: {other}"))),
    }
}
