//! SQLite task storage backend — embedded backend for local/demo
//! deployment. Same logical schema as [`crate::postgres`], with JSON
//! columns stored as TEXT since SQLite has no native JSONB type.

use crate::error::map_sqlx_error;
use crate::state_machine;
use crate::traits::TaskStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::debug;

use task_types::{
    CoreError, ListTasksFilter, Task, TaskId, TaskListPage, TaskMetadata, TaskPayload, TaskResult,
    TaskState, TaskStatus, TaskView, MAX_LIST_LIMIT,
};

#[derive(Debug, Clone)]
pub struct SqliteTaskConfig {
    pub database_url: String,
    pub create_tables_if_missing: bool,
}

impl Default for SqliteTaskConfig {
    fn default() -> Self {
        Self { database_url: "sqlite::memory:".to_string(), create_tables_if_missing: true }
    }
}

pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub async fn new(config: SqliteTaskConfig) -> Result<Self, CoreError> {
        let pool = SqlitePool::connect(&config.database_url).await.map_err(map_sqlx_error)?;
        let store = Self { pool };
        if config.create_tables_if_missing {
            store.migrate().await?;
        }
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), CoreError> {
        debug!("running sqlite task store migrations");
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
                payload TEXT NOT NULL
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
                created_at TEXT,
                updated_at TEXT,
                started_at TEXT,
                finished_at TEXT,
                custom TEXT NOT NULL DEFAULT '{}'
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
                progress TEXT NOT NULL DEFAULT '{}',
                message TEXT,
                metrics TEXT NOT NULL DEFAULT '{}'
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
                data TEXT NOT NULL,
                expires_at TEXT,
                ttl_seconds INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn load_status(&self, task_id: TaskId) -> Result<TaskStatus, CoreError> {
        let row = sqlx::query(
            "SELECT state, progress, message, metrics FROM task_statuses WHERE task_id = ?",
        )
        .bind(task_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(CoreError::NotFound)?;
        status_from_row(&row)
    }
}

fn status_from_row(row: &SqliteRow) -> Result<TaskStatus, CoreError> {
    let state: String = row.try_get("state").map_err(map_sqlx_error)?;
    let progress: String = row.try_get("progress").map_err(map_sqlx_error)?;
    let message: Option<String> = row.try_get("message").map_err(map_sqlx_error)?;
    let metrics: String = row.try_get("metrics").map_err(map_sqlx_error)?;
    Ok(TaskStatus {
        state: parse_state(&state)?,
        progress: serde_json::from_str(&progress).unwrap_or_default(),
        message,
        metrics: serde_json::from_str(&metrics).unwrap_or_default(),
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

fn parse_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn create_task(
        &self,
        owner_id: &str,
        task_id: TaskId,
        payload: TaskPayload,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let inserted = sqlx::query("INSERT OR IGNORE INTO tasks (task_id, owner_id, task_type) VALUES (?, ?, ?)")
            .bind(task_id.to_string())
            .bind(owner_id)
            .bind(payload.task_type().as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if inserted.rows_affected() == 0 {
            return Err(CoreError::Conflict);
        }

        sqlx::query("INSERT INTO task_payloads (task_id, payload) VALUES (?, ?)")
            .bind(task_id.to_string())
            .bind(serde_json::to_string(&payload)?)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let now = Utc::now().to_rfc3339();
        sqlx::query("INSERT INTO task_metadata (task_id, created_at, updated_at) VALUES (?, ?, ?)")
            .bind(task_id.to_string())
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        sqlx::query("INSERT INTO task_statuses (task_id, state) VALUES (?, ?)")
            .bind(task_id.to_string())
            .bind(state_str(TaskState::Queued))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_task(&self, owner_id: &str, task_id: TaskId) -> Result<Task, CoreError> {
        let row = sqlx::query("SELECT owner_id FROM tasks WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or(CoreError::NotFound)?;
        let row_owner: String = row.try_get("owner_id").map_err(map_sqlx_error)?;
        if row_owner != owner_id {
            return Err(CoreError::AccessDenied);
        }

        let payload_row = sqlx::query("SELECT payload FROM task_payloads WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let payload_str: String = payload_row.try_get("payload").map_err(map_sqlx_error)?;
        let payload: TaskPayload = serde_json::from_str(&payload_str)?;

        let meta_row = sqlx::query(
            "SELECT created_at, updated_at, started_at, finished_at, custom FROM task_metadata WHERE task_id = ?",
        )
        .bind(task_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        let custom_str: String = meta_row.try_get("custom").map_err(map_sqlx_error)?;
        let metadata = TaskMetadata {
            created_at: parse_ts(meta_row.try_get("created_at").map_err(map_sqlx_error)?),
            updated_at: parse_ts(meta_row.try_get("updated_at").map_err(map_sqlx_error)?),
            started_at: parse_ts(meta_row.try_get("started_at").map_err(map_sqlx_error)?),
            finished_at: parse_ts(meta_row.try_get("finished_at").map_err(map_sqlx_error)?),
            custom: serde_json::from_str(&custom_str).unwrap_or_default(),
        };

        let status = self.load_status(task_id).await?;

        let result_row = sqlx::query("SELECT data, expires_at, ttl_seconds FROM task_results WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let result = match result_row {
            Some(r) => {
                let data_str: String = r.try_get("data").map_err(map_sqlx_error)?;
                Some(TaskResult {
                    task_id,
                    data: serde_json::from_str(&data_str)?,
                    expires_at: parse_ts(r.try_get("expires_at").map_err(map_sqlx_error)?),
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
            WHERE t.owner_id = ?1
              AND (?2 IS NULL OR t.task_type = ?2)
              AND (?3 IS NULL OR s.state = ?3)
            ORDER BY t.task_id ASC
            LIMIT ?4 OFFSET ?5
            "#,
        )
        .bind(owner_id)
        .bind(filter.task_type.map(|t| t.as_str().to_string()))
        .bind(filter.state.map(state_str))
        .bind(limit + 1)
        .bind(filter.offset as i64)
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
                task_id: TaskId::from_str(&task_id).map_err(|e| CoreError::Fatal(e.to_string()))?,
                owner_id: row.try_get::<String, _>("owner_id").map_err(map_sqlx_error)?,
                task_type: task_type_from_str(&task_type)?,
                state: parse_state(&state)?,
                created_at: parse_ts(row.try_get("created_at").map_err(map_sqlx_error)?),
                updated_at: parse_ts(row.try_get("updated_at").map_err(map_sqlx_error)?),
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

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query(
            "UPDATE task_statuses SET state = ?, progress = ?, message = ?, metrics = ? WHERE task_id = ?",
        )
        .bind(state_str(status.state))
        .bind(serde_json::to_string(&status.progress)?)
        .bind(&status.message)
        .bind(serde_json::to_string(&status.metrics)?)
        .bind(task_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if status.state.is_terminal() {
            sqlx::query("UPDATE task_metadata SET updated_at = ?, finished_at = ? WHERE task_id = ?")
                .bind(&now)
                .bind(&now)
                .bind(task_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        } else if matches!(status.state, TaskState::Running) {
            sqlx::query(
                "UPDATE task_metadata SET updated_at = ?, started_at = COALESCE(started_at, ?) WHERE task_id = ?",
            )
            .bind(&now)
            .bind(&now)
            .bind(task_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        } else {
            sqlx::query("UPDATE task_metadata SET updated_at = ? WHERE task_id = ?")
                .bind(&now)
                .bind(task_id.to_string())
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
            INSERT INTO task_results (task_id, data, expires_at, ttl_seconds) VALUES (?, ?, ?, ?)
            ON CONFLICT (task_id) DO UPDATE SET data = excluded.data, expires_at = excluded.expires_at, ttl_seconds = excluded.ttl_seconds
            "#,
        )
        .bind(task_id.to_string())
        .bind(serde_json::to_string(&result.data)?)
        .bind(result.expires_at.map(|d| d.to_rfc3339()))
        .bind(result.ttl_seconds)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if let Some(ts) = finished_at {
            sqlx::query("UPDATE task_metadata SET finished_at = ?, updated_at = ? WHERE task_id = ?")
                .bind(ts.to_rfc3339())
                .bind(ts.to_rfc3339())
                .bind(task_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn recover_stuck_tasks(&self, max_age_ms: u64) -> Result<Vec<TaskId>, CoreError> {
        let cutoff = (Utc::now() - chrono::Duration::milliseconds(max_age_ms as i64)).to_rfc3339();
        let rows = sqlx::query(
            r#"
            SELECT t.task_id FROM tasks t
            JOIN task_statuses s ON s.task_id = t.task_id
            JOIN task_metadata m ON m.task_id = t.task_id
            WHERE s.state NOT IN ('COMPLETED', 'FAILED', 'CANCELLED') AND m.updated_at < ?
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut recovered = Vec::new();
        for row in rows {
            let task_id_str: String = row.try_get("task_id").map_err(map_sqlx_error)?;
            let task_id = TaskId::from_str(&task_id_str).map_err(|e| CoreError::Fatal(e.to_string()))?;
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
