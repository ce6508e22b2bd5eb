//! Coordinator dispatch loop.
//!
//! Each cycle claims every due task (`scheduled|retrying -> running`, committed
//! before the RPC goes out) and dispatches it. Only the transport outcome is
//! handled here: a failed dispatch goes through the retry policy, a delivered
//! one is left to the worker, which owns the terminal transition.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;
use crate::error::Result;
use crate::models::{Task, TaskStatus};
use crate::protocol::{RetryingDispatcher, RpcClient, TaskDispatcher, TaskRequest};
use crate::store::Store;

/// What one polling cycle did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
  pub due: usize,
  pub dispatched: usize,
  pub retrying: usize,
  pub failed: usize,
  /// Due tasks that were claimed elsewhere before this loop got to them.
  pub skipped: usize,
  /// Tasks whose claim or failure write hit a store error.
  pub errors: usize,
}

pub struct Dispatcher {
  store: Arc<dyn Store>,
  client: Arc<dyn TaskDispatcher>,
  config: DispatchConfig,
}

impl Dispatcher {
  pub fn new(store: Arc<dyn Store>, client: Arc<dyn TaskDispatcher>, config: DispatchConfig) -> Self {
    Self { store, client, config }
  }

  /// Dispatcher talking to `config.worker_url` over the RPC protocol.
  pub fn with_rpc(store: Arc<dyn Store>, config: DispatchConfig) -> Result<Self> {
    let client = RpcClient::new(&config.worker_url, config.request_timeout)?;
    let dispatcher = RetryingDispatcher::new(client, config.network_attempts, config.network_retry_delay);
    Ok(Self::new(store, Arc::new(dispatcher), config))
  }

  /// Run one polling cycle against the tasks due at `now`. Tasks are handled
  /// one after another; per-task timestamps never precede `now`. A store error
  /// on one task is logged and counted, and the cycle moves on.
  pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
    let due = self.store.due_tasks(now).await?;
    let mut report = CycleReport { due: due.len(), ..Default::default() };

    if due.is_empty() {
      debug!("No due tasks this cycle");
      return Ok(report);
    }
    info!(count = due.len(), "Found task(s) ready to dispatch");

    for task in due {
      let claimed = match self.store.claim_task(task.id, now.max(Utc::now())).await {
        Ok(Some(claimed)) => claimed,
        Ok(None) => {
          report.skipped += 1;
          continue;
        }
        Err(e) => {
          report.errors += 1;
          error!(task_id = task.id, error = %e, "Failed to claim task");
          continue;
        }
      };
      if let Err(e) = self.dispatch(claimed, now, &mut report).await {
        report.errors += 1;
        error!(task_id = task.id, error = %e, "Failed to record dispatch failure, task stays running");
      }
    }
    Ok(report)
  }

  async fn dispatch(&self, task: Task, now: DateTime<Utc>, report: &mut CycleReport) -> Result<()> {
    info!(task_id = task.id, command = %task.command, "Dispatching task");
    let request = TaskRequest { id: task.id, command: task.command };

    match self.client.execute_task(&request).await {
      Ok(response) => {
        report.dispatched += 1;
        info!(task_id = task.id, status = %response.status, message = %response.message, "Task dispatched");
      }
      Err(e) => {
        warn!(task_id = task.id, error = %e, "Dispatch failed");
        let updated = self
          .store
          .record_dispatch_failure(task.id, &self.config.retry, now.max(Utc::now()))
          .await?;
        match updated {
          Some(t) if t.status == TaskStatus::Retrying => {
            report.retrying += 1;
            warn!(task_id = t.id, retry_count = t.retry_count, retry_at = ?t.retry_at, "Task will retry");
          }
          Some(t) => {
            report.failed += 1;
            error!(task_id = t.id, max_retries = self.config.retry.max_retries, "Task reached max retries");
          }
          None => debug!(task_id = task.id, "Task finished by worker despite dispatch error"),
        }
      }
    }
    Ok(())
  }

  pub async fn run(&self, shutdown: CancellationToken) {
    info!(interval = ?self.config.poll_interval, "Coordinator polling loop started");
    loop {
      if let Err(e) = self.run_cycle(Utc::now()).await {
        error!(error = %e, "Dispatch cycle failed");
      }
      tokio::select! {
        _ = shutdown.cancelled() => break,
        _ = tokio::time::sleep(self.config.poll_interval) => {}
      }
    }
    info!("Coordinator polling loop stopped");
  }
}
