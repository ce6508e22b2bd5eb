use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
  Scheduled,
  Running,
  Retrying,
  Done,
  Failed,
}

impl TaskStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      TaskStatus::Scheduled => "scheduled",
      TaskStatus::Running => "running",
      TaskStatus::Retrying => "retrying",
      TaskStatus::Done => "done",
      TaskStatus::Failed => "failed",
    }
  }

  /// Done and failed tasks never transition again.
  pub fn is_terminal(&self) -> bool {
    matches!(self, TaskStatus::Done | TaskStatus::Failed)
  }

  /// Statuses the dispatch loop is allowed to claim.
  pub fn is_claimable(&self) -> bool {
    matches!(self, TaskStatus::Scheduled | TaskStatus::Retrying)
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(self.as_str())
  }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for TaskStatus {
  type Err = UnknownStatus;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "scheduled" => Ok(TaskStatus::Scheduled),
      "running" => Ok(TaskStatus::Running),
      "retrying" => Ok(TaskStatus::Retrying),
      "done" => Ok(TaskStatus::Done),
      "failed" => Ok(TaskStatus::Failed),
      other => Err(UnknownStatus(other.to_string())),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
  Alive,
  Dead,
}

impl WorkerStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      WorkerStatus::Alive => "alive",
      WorkerStatus::Dead => "dead",
    }
  }
}

impl fmt::Display for WorkerStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(self.as_str())
  }
}

impl FromStr for WorkerStatus {
  type Err = UnknownStatus;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "alive" => Ok(WorkerStatus::Alive),
      "dead" => Ok(WorkerStatus::Dead),
      other => Err(UnknownStatus(other.to_string())),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
  pub id: i64,
  pub command: String,
  pub status: TaskStatus,
  pub message: Option<String>,
  pub scheduled_at: DateTime<Utc>,
  pub created_at: DateTime<Utc>,
  pub picked_at: Option<DateTime<Utc>>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
  pub failed_at: Option<DateTime<Utc>>,
  pub retry_at: Option<DateTime<Utc>>,
  pub retry_count: i32,
}

impl Task {
  /// Wall-clock execution time, known only for tasks that completed.
  pub fn execution_seconds(&self) -> Option<f64> {
    match (self.started_at, self.completed_at) {
      (Some(started), Some(completed)) => {
        Some((completed - started).num_milliseconds() as f64 / 1000.0)
      }
      _ => None,
    }
  }
}

/// Intake payload after validation and UTC normalization.
#[derive(Debug, Clone)]
pub struct NewTask {
  pub command: String,
  pub scheduled_at: DateTime<Utc>,
}

/// Terminal result of running a task's command on a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
  Done(String),
  Failed(String),
}

impl TaskOutcome {
  pub fn status(&self) -> TaskStatus {
    match self {
      TaskOutcome::Done(_) => TaskStatus::Done,
      TaskOutcome::Failed(_) => TaskStatus::Failed,
    }
  }

  pub fn message(&self) -> &str {
    match self {
      TaskOutcome::Done(message) | TaskOutcome::Failed(message) => message,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
  pub id: i64,
  pub hostname: String,
  pub last_heartbeat: DateTime<Utc>,
  pub status: WorkerStatus,
}
