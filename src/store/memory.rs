//! In-process [`Store`] for tests and single-process embedding.
//!
//! Each operation holds the lock for its whole read-modify-write, which gives
//! the same atomicity the Postgres store gets from its transactions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::Store;
use crate::error::Result;
use crate::models::{NewTask, Task, TaskOutcome, TaskStatus, Worker, WorkerStatus};
use crate::retry::{RetryDecision, RetryPolicy};

#[derive(Default)]
struct Tables {
  tasks: BTreeMap<i64, Task>,
  workers: BTreeMap<i64, Worker>,
  next_task_id: i64,
  next_worker_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
  tables: Mutex<Tables>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Overwrite a worker's last heartbeat, for exercising liveness timeouts.
  pub async fn set_last_heartbeat(&self, hostname: &str, at: DateTime<Utc>) -> bool {
    let mut tables = self.tables.lock().await;
    match tables.workers.values_mut().find(|w| w.hostname == hostname) {
      Some(worker) => {
        worker.last_heartbeat = at;
        true
      }
      None => false,
    }
  }
}

fn is_due(task: &Task, now: DateTime<Utc>) -> bool {
  match task.status {
    TaskStatus::Scheduled => task.scheduled_at <= now,
    TaskStatus::Retrying => task.retry_at.is_some_and(|at| at <= now),
    _ => false,
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn create_task(&self, task: NewTask) -> Result<Task> {
    let mut tables = self.tables.lock().await;
    tables.next_task_id += 1;
    let created = Task {
      id: tables.next_task_id,
      command: task.command,
      status: TaskStatus::Scheduled,
      message: None,
      scheduled_at: task.scheduled_at,
      created_at: Utc::now(),
      picked_at: None,
      started_at: None,
      completed_at: None,
      failed_at: None,
      retry_at: None,
      retry_count: 0,
    };
    tables.tasks.insert(created.id, created.clone());
    Ok(created)
  }

  async fn get_task(&self, id: i64) -> Result<Option<Task>> {
    Ok(self.tables.lock().await.tasks.get(&id).cloned())
  }

  async fn recent_tasks(&self, limit: i64) -> Result<Vec<Task>> {
    let tables = self.tables.lock().await;
    let mut tasks: Vec<Task> = tables.tasks.values().cloned().collect();
    tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    tasks.truncate(usize::try_from(limit).unwrap_or(0));
    Ok(tasks)
  }

  async fn list_tasks(&self) -> Result<Vec<Task>> {
    Ok(self.tables.lock().await.tasks.values().cloned().collect())
  }

  async fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
    let tables = self.tables.lock().await;
    Ok(tables.tasks.values().filter(|t| is_due(t, now)).cloned().collect())
  }

  async fn claim_task(&self, id: i64, now: DateTime<Utc>) -> Result<Option<Task>> {
    let mut tables = self.tables.lock().await;
    let Some(task) = tables.tasks.get_mut(&id).filter(|t| t.status.is_claimable()) else {
      return Ok(None);
    };
    task.status = TaskStatus::Running;
    task.picked_at = Some(now);
    task.retry_at = None;
    Ok(Some(task.clone()))
  }

  async fn record_dispatch_failure(
    &self,
    id: i64,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
  ) -> Result<Option<Task>> {
    let mut tables = self.tables.lock().await;
    let Some(task) = tables.tasks.get_mut(&id).filter(|t| t.status == TaskStatus::Running) else {
      return Ok(None);
    };
    match policy.decide(task.retry_count, now) {
      RetryDecision::Retry { retry_count, retry_at } => {
        task.status = TaskStatus::Retrying;
        task.retry_count = retry_count;
        task.retry_at = Some(retry_at);
      }
      RetryDecision::Fail { retry_count } => {
        task.status = TaskStatus::Failed;
        task.retry_count = retry_count;
        task.failed_at = Some(now);
        task.retry_at = None;
      }
    }
    Ok(Some(task.clone()))
  }

  async fn mark_task_started(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
    let mut tables = self.tables.lock().await;
    match tables.tasks.get_mut(&id).filter(|t| !t.status.is_terminal()) {
      Some(task) => {
        task.started_at = Some(now);
        Ok(true)
      }
      None => Ok(false),
    }
  }

  async fn finish_task(&self, id: i64, outcome: &TaskOutcome, now: DateTime<Utc>) -> Result<Option<Task>> {
    let mut tables = self.tables.lock().await;
    let Some(task) = tables.tasks.get_mut(&id).filter(|t| !t.status.is_terminal()) else {
      return Ok(None);
    };
    task.status = outcome.status();
    task.message = Some(outcome.message().to_string());
    task.retry_at = None;
    match outcome {
      TaskOutcome::Done(_) => {
        task.completed_at = Some(now);
        task.failed_at = None;
      }
      TaskOutcome::Failed(_) => {
        task.failed_at = Some(now);
        task.completed_at = None;
      }
    }
    Ok(Some(task.clone()))
  }

  async fn record_heartbeat(&self, hostname: &str, now: DateTime<Utc>) -> Result<Worker> {
    let mut tables = self.tables.lock().await;
    if let Some(worker) = tables.workers.values_mut().find(|w| w.hostname == hostname) {
      worker.last_heartbeat = now;
      worker.status = WorkerStatus::Alive;
      return Ok(worker.clone());
    }
    tables.next_worker_id += 1;
    let worker = Worker {
      id: tables.next_worker_id,
      hostname: hostname.to_string(),
      last_heartbeat: now,
      status: WorkerStatus::Alive,
    };
    tables.workers.insert(worker.id, worker.clone());
    Ok(worker)
  }

  async fn reap_dead_workers(&self, threshold: DateTime<Utc>) -> Result<Vec<Worker>> {
    let mut tables = self.tables.lock().await;
    let mut reaped = Vec::new();
    for worker in tables.workers.values_mut() {
      if worker.status == WorkerStatus::Alive && worker.last_heartbeat <= threshold {
        worker.status = WorkerStatus::Dead;
        reaped.push(worker.clone());
      }
    }
    Ok(reaped)
  }

  async fn list_workers(&self) -> Result<Vec<Worker>> {
    Ok(self.tables.lock().await.workers.values().cloned().collect())
  }
}
