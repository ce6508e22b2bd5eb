//! Persisted task and worker state.
//!
//! Every component reads and writes through [`Store`]; nothing caches rows
//! between polling cycles. Each method is a single transaction, so a crash
//! between a read and its write never leaves a row half-updated.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{NewTask, Task, TaskOutcome, Worker};
use crate::retry::RetryPolicy;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
  /// Insert a task in `scheduled` state.
  async fn create_task(&self, task: NewTask) -> Result<Task>;

  async fn get_task(&self, id: i64) -> Result<Option<Task>>;

  /// Newest tasks first.
  async fn recent_tasks(&self, limit: i64) -> Result<Vec<Task>>;

  async fn list_tasks(&self) -> Result<Vec<Task>>;

  /// Scheduled tasks whose `scheduled_at` has passed and retrying tasks
  /// whose `retry_at` has passed, ordered by id.
  async fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>>;

  /// Move a scheduled or retrying task to `running`. Returns `None` when the
  /// row is gone or someone else already claimed it.
  async fn claim_task(&self, id: i64, now: DateTime<Utc>) -> Result<Option<Task>>;

  /// Apply the retry-or-fail transition to a `running` task whose dispatch
  /// failed. Tasks no longer running (a worker already reported) are left alone.
  async fn record_dispatch_failure(
    &self,
    id: i64,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
  ) -> Result<Option<Task>>;

  async fn mark_task_started(&self, id: i64, now: DateTime<Utc>) -> Result<bool>;

  /// Write the terminal status. A task that is already done or failed is not touched.
  async fn finish_task(&self, id: i64, outcome: &TaskOutcome, now: DateTime<Utc>) -> Result<Option<Task>>;

  /// Upsert the worker by hostname and mark it alive.
  async fn record_heartbeat(&self, hostname: &str, now: DateTime<Utc>) -> Result<Worker>;

  /// Mark alive workers with `last_heartbeat <= threshold` as dead and return them.
  async fn reap_dead_workers(&self, threshold: DateTime<Utc>) -> Result<Vec<Worker>>;

  async fn list_workers(&self) -> Result<Vec<Worker>>;
}
