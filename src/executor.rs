//! Worker execution engine.
//!
//! Runs dispatched commands through `sh -c`, at most `concurrency` at a time.
//! Calls past the limit wait for a slot instead of being rejected. The store
//! write always happens before the RPC reply, and the run is detached from the
//! request so a dropped connection cannot cancel it halfway.

use std::process::{Output, Stdio};
use std::sync::Arc;

use chrono::Utc;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::models::TaskOutcome;
use crate::protocol::{TaskRequest, TaskResponse};
use crate::store::Store;

const DEFAULT_SUCCESS_MESSAGE: &str = "Executed successfully";

pub struct Executor {
  store: Arc<dyn Store>,
  permits: Arc<Semaphore>,
}

impl Executor {
  pub fn new(store: Arc<dyn Store>, concurrency: usize) -> Self {
    Self {
      store,
      permits: Arc::new(Semaphore::new(concurrency.max(1))),
    }
  }

  pub fn available_slots(&self) -> usize {
    self.permits.available_permits()
  }

  /// Run `request` on its own task and wait for the reply.
  pub async fn submit(self: &Arc<Self>, request: TaskRequest) -> TaskResponse {
    let id = request.id;
    let executor = Arc::clone(self);
    match tokio::spawn(async move { executor.execute(request).await }).await {
      Ok(response) => response,
      Err(e) => {
        error!(task_id = id, error = %e, "Execution task aborted");
        TaskResponse { id, status: "failed".into(), message: e.to_string() }
      }
    }
  }

  pub async fn execute(&self, request: TaskRequest) -> TaskResponse {
    let _permit = match self.permits.acquire().await {
      Ok(permit) => permit,
      Err(e) => {
        return TaskResponse { id: request.id, status: "failed".into(), message: e.to_string() };
      }
    };
    let TaskRequest { id, command } = request;
    info!(task_id = id, command = %command, "Received task");

    match self.store.mark_task_started(id, Utc::now()).await {
      Ok(true) => {}
      Ok(false) => warn!(task_id = id, "Task missing or already finished, running anyway"),
      Err(e) => error!(task_id = id, error = %e, "Failed to record start time"),
    }

    let outcome = run_command(&command).await;
    match &outcome {
      TaskOutcome::Done(_) => info!(task_id = id, "Task completed successfully"),
      TaskOutcome::Failed(message) => error!(task_id = id, message = %message, "Task failed"),
    }

    match self.store.finish_task(id, &outcome, Utc::now()).await {
      Ok(Some(_)) => {}
      Ok(None) => warn!(task_id = id, "Task missing or already terminal, outcome not recorded"),
      Err(e) => error!(task_id = id, error = %e, "Failed to record task outcome"),
    }

    TaskResponse {
      id,
      status: outcome.status().as_str().to_string(),
      message: outcome.message().to_string(),
    }
  }
}

/// Run `command` through the shell and classify the result.
pub async fn run_command(command: &str) -> TaskOutcome {
  let result = Command::new("sh")
    .arg("-c")
    .arg(command)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .output()
    .await;

  match result {
    Ok(output) => classify(output),
    Err(e) => TaskOutcome::Failed(e.to_string()),
  }
}

fn classify(output: Output) -> TaskOutcome {
  let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
  let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

  if output.status.success() {
    if stdout.is_empty() {
      TaskOutcome::Done(DEFAULT_SUCCESS_MESSAGE.to_string())
    } else {
      TaskOutcome::Done(stdout)
    }
  } else if stderr.is_empty() {
    TaskOutcome::Failed(match output.status.code() {
      Some(code) => format!("Exit code: {}", code),
      None => "Terminated by signal".to_string(),
    })
  } else {
    TaskOutcome::Failed(stderr)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{NewTask, TaskStatus};
  use crate::store::MemoryStore;

  #[tokio::test]
  async fn success_uses_trimmed_stdout() {
    assert_eq!(run_command("echo '  ok  '").await, TaskOutcome::Done("ok".into()));
    assert_eq!(run_command("true").await, TaskOutcome::Done(DEFAULT_SUCCESS_MESSAGE.into()));
  }

  #[tokio::test]
  async fn failure_uses_stderr_or_exit_code() {
    assert_eq!(run_command("echo boom >&2; exit 1").await, TaskOutcome::Failed("boom".into()));
    assert_eq!(run_command("exit 7").await, TaskOutcome::Failed("Exit code: 7".into()));
  }

  #[tokio::test]
  async fn missing_binary_is_a_failure() {
    let outcome = run_command("definitely-not-a-real-binary-xyz").await;
    assert_eq!(outcome.status(), TaskStatus::Failed);
  }

  #[tokio::test]
  async fn execute_writes_outcome_before_replying() {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();
    let task = store
      .create_task(NewTask { command: "echo ok".into(), scheduled_at: now })
      .await
      .unwrap();
    store.claim_task(task.id, now).await.unwrap();

    let executor = Arc::new(Executor::new(store.clone(), 2));
    let response = executor.submit(TaskRequest { id: task.id, command: task.command.clone() }).await;
    assert_eq!(response.status, "done");
    assert_eq!(response.message, "ok");

    let stored = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Done);
    assert!(stored.started_at.is_some());
    assert!(stored.completed_at.is_some());
    assert!(stored.failed_at.is_none());
    assert_eq!(executor.available_slots(), 2);
  }
}
