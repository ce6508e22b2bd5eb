//! Postgres-backed [`Store`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use std::str::FromStr;
use tracing::debug;

use super::Store;
use crate::error::Result;
use crate::models::{NewTask, Task, TaskOutcome, TaskStatus, UnknownStatus, Worker};
use crate::retry::{RetryDecision, RetryPolicy};

#[derive(Debug, Clone)]
pub struct PgStore {
  pool: PgPool,
}

impl PgStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  pub fn pool(&self) -> &PgPool {
    &self.pool
  }
}

fn parse_column<T>(column: &str, raw: String) -> std::result::Result<T, sqlx::Error>
where
  T: FromStr<Err = UnknownStatus>,
{
  raw.parse().map_err(|e: UnknownStatus| sqlx::Error::ColumnDecode {
    index: column.to_string(),
    source: Box::new(e),
  })
}

impl<'r> FromRow<'r, PgRow> for Task {
  fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
    Ok(Task {
      id: row.try_get("id")?,
      command: row.try_get("command")?,
      status: parse_column("status", row.try_get("status")?)?,
      message: row.try_get("message")?,
      scheduled_at: row.try_get("scheduled_at")?,
      created_at: row.try_get("created_at")?,
      picked_at: row.try_get("picked_at")?,
      started_at: row.try_get("started_at")?,
      completed_at: row.try_get("completed_at")?,
      failed_at: row.try_get("failed_at")?,
      retry_at: row.try_get("retry_at")?,
      retry_count: row.try_get("retry_count")?,
    })
  }
}

impl<'r> FromRow<'r, PgRow> for Worker {
  fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
    Ok(Worker {
      id: row.try_get("id")?,
      hostname: row.try_get("hostname")?,
      last_heartbeat: row.try_get("last_heartbeat")?,
      status: parse_column("status", row.try_get("status")?)?,
    })
  }
}

#[async_trait]
impl Store for PgStore {
  async fn create_task(&self, task: NewTask) -> Result<Task> {
    let created = sqlx::query_as::<_, Task>(
      "INSERT INTO tasks (command, scheduled_at, status, retry_count) \
       VALUES ($1, $2, 'scheduled', 0) RETURNING *",
    )
    .bind(&task.command)
    .bind(task.scheduled_at)
    .fetch_one(&self.pool)
    .await?;
    Ok(created)
  }

  async fn get_task(&self, id: i64) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
      .bind(id)
      .fetch_optional(&self.pool)
      .await?;
    Ok(task)
  }

  async fn recent_tasks(&self, limit: i64) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>("SELECT * FROM tasks ORDER BY created_at DESC, id DESC LIMIT $1")
      .bind(limit)
      .fetch_all(&self.pool)
      .await?;
    Ok(tasks)
  }

  async fn list_tasks(&self) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>("SELECT * FROM tasks ORDER BY id")
      .fetch_all(&self.pool)
      .await?;
    Ok(tasks)
  }

  async fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
      "SELECT * FROM tasks \
       WHERE (status = 'scheduled' AND scheduled_at <= $1) \
          OR (status = 'retrying' AND retry_at <= $1) \
       ORDER BY id",
    )
    .bind(now)
    .fetch_all(&self.pool)
    .await?;
    Ok(tasks)
  }

  async fn claim_task(&self, id: i64, now: DateTime<Utc>) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>(
      "UPDATE tasks SET status = 'running', picked_at = $2, retry_at = NULL \
       WHERE id = $1 AND status IN ('scheduled', 'retrying') RETURNING *",
    )
    .bind(id)
    .bind(now)
    .fetch_optional(&self.pool)
    .await?;
    Ok(task)
  }

  async fn record_dispatch_failure(
    &self,
    id: i64,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
  ) -> Result<Option<Task>> {
    let mut tx = self.pool.begin().await?;

    let current = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1 FOR UPDATE")
      .bind(id)
      .fetch_optional(&mut *tx)
      .await?;

    let Some(current) = current.filter(|t| t.status == TaskStatus::Running) else {
      debug!(task_id = id, "Task no longer running, skipping dispatch failure");
      tx.commit().await?;
      return Ok(None);
    };

    let updated = match policy.decide(current.retry_count, now) {
      RetryDecision::Retry { retry_count, retry_at } => {
        sqlx::query_as::<_, Task>(
          "UPDATE tasks SET status = 'retrying', retry_count = $2, retry_at = $3 \
           WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(retry_count)
        .bind(retry_at)
        .fetch_one(&mut *tx)
        .await?
      }
      RetryDecision::Fail { retry_count } => {
        sqlx::query_as::<_, Task>(
          "UPDATE tasks SET status = 'failed', retry_count = $2, failed_at = $3, retry_at = NULL \
           WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(retry_count)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?
      }
    };

    tx.commit().await?;
    Ok(Some(updated))
  }

  async fn mark_task_started(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
      "UPDATE tasks SET started_at = $2 WHERE id = $1 AND status NOT IN ('done', 'failed')",
    )
    .bind(id)
    .bind(now)
    .execute(&self.pool)
    .await?;
    Ok(result.rows_affected() > 0)
  }

  async fn finish_task(&self, id: i64, outcome: &TaskOutcome, now: DateTime<Utc>) -> Result<Option<Task>> {
    let (completed_at, failed_at) = match outcome {
      TaskOutcome::Done(_) => (Some(now), None),
      TaskOutcome::Failed(_) => (None, Some(now)),
    };
    let task = sqlx::query_as::<_, Task>(
      "UPDATE tasks SET status = $2, message = $3, completed_at = $4, failed_at = $5, retry_at = NULL \
       WHERE id = $1 AND status NOT IN ('done', 'failed') RETURNING *",
    )
    .bind(id)
    .bind(outcome.status().as_str())
    .bind(outcome.message())
    .bind(completed_at)
    .bind(failed_at)
    .fetch_optional(&self.pool)
    .await?;
    Ok(task)
  }

  async fn record_heartbeat(&self, hostname: &str, now: DateTime<Utc>) -> Result<Worker> {
    let worker = sqlx::query_as::<_, Worker>(
      "INSERT INTO workers (hostname, last_heartbeat, status) VALUES ($1, $2, 'alive') \
       ON CONFLICT (hostname) DO UPDATE SET last_heartbeat = EXCLUDED.last_heartbeat, status = 'alive' \
       RETURNING *",
    )
    .bind(hostname)
    .bind(now)
    .fetch_one(&self.pool)
    .await?;
    Ok(worker)
  }

  async fn reap_dead_workers(&self, threshold: DateTime<Utc>) -> Result<Vec<Worker>> {
    let workers = sqlx::query_as::<_, Worker>(
      "UPDATE workers SET status = 'dead' \
       WHERE status = 'alive' AND last_heartbeat <= $1 RETURNING *",
    )
    .bind(threshold)
    .fetch_all(&self.pool)
    .await?;
    Ok(workers)
  }

  async fn list_workers(&self) -> Result<Vec<Worker>> {
    let workers = sqlx::query_as::<_, Worker>("SELECT * FROM workers ORDER BY id")
      .fetch_all(&self.pool)
      .await?;
    Ok(workers)
  }
}
