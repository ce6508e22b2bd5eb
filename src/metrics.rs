//! Read-only projections over the task table, recomputed from a full scan on
//! every request.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::Serialize;

use crate::models::{Task, TaskStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskMetrics {
  pub total_tasks: usize,
  pub tasks_by_status: BTreeMap<String, usize>,
  pub tasks_running: usize,
  pub tasks_failed: usize,
  pub tasks_done: usize,
  pub avg_execution_seconds: f64,
}

impl TaskMetrics {
  pub fn from_tasks(tasks: &[Task]) -> Self {
    let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
    for task in tasks {
      *by_status.entry(task.status.to_string()).or_default() += 1;
    }
    let count = |status: TaskStatus| by_status.get(status.as_str()).copied().unwrap_or(0);

    let durations: Vec<f64> = tasks.iter().filter_map(Task::execution_seconds).collect();
    let avg_execution_seconds = if durations.is_empty() {
      0.0
    } else {
      durations.iter().sum::<f64>() / durations.len() as f64
    };

    Self {
      total_tasks: tasks.len(),
      tasks_running: count(TaskStatus::Running),
      tasks_failed: count(TaskStatus::Failed),
      tasks_done: count(TaskStatus::Done),
      tasks_by_status: by_status,
      avg_execution_seconds,
    }
  }

  /// Prometheus text exposition of the task gauges.
  pub fn to_prometheus(&self) -> String {
    let gauges = [
      ("taskflow_total_tasks", "Total number of tasks", self.total_tasks),
      ("taskflow_tasks_running", "Currently running tasks", self.tasks_running),
      ("taskflow_tasks_failed", "Failed tasks", self.tasks_failed),
      ("taskflow_tasks_done", "Completed tasks", self.tasks_done),
    ];
    let mut out = String::new();
    for (name, help, value) in gauges {
      let _ = writeln!(out, "# HELP {} {}", name, help);
      let _ = writeln!(out, "# TYPE {} gauge", name);
      let _ = writeln!(out, "{} {}", name, value);
    }
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{Duration, Utc};

  fn task(id: i64, status: TaskStatus, run_secs: Option<i64>) -> Task {
    let now = Utc::now();
    Task {
      id,
      command: "true".into(),
      status,
      message: None,
      scheduled_at: now,
      created_at: now,
      picked_at: None,
      started_at: run_secs.map(|_| now),
      completed_at: run_secs.map(|s| now + Duration::seconds(s)),
      failed_at: None,
      retry_at: None,
      retry_count: 0,
    }
  }

  #[test]
  fn counts_and_average_duration() {
    let tasks = vec![
      task(1, TaskStatus::Done, Some(2)),
      task(2, TaskStatus::Done, Some(4)),
      task(3, TaskStatus::Failed, None),
      task(4, TaskStatus::Running, None),
      task(5, TaskStatus::Scheduled, None),
    ];
    let metrics = TaskMetrics::from_tasks(&tasks);
    assert_eq!(metrics.total_tasks, 5);
    assert_eq!(metrics.tasks_done, 2);
    assert_eq!(metrics.tasks_failed, 1);
    assert_eq!(metrics.tasks_running, 1);
    assert_eq!(metrics.tasks_by_status["scheduled"], 1);
    assert_eq!(metrics.avg_execution_seconds, 3.0);
  }

  #[test]
  fn empty_store_reports_zero() {
    let metrics = TaskMetrics::from_tasks(&[]);
    assert_eq!(metrics.total_tasks, 0);
    assert_eq!(metrics.avg_execution_seconds, 0.0);
    assert!(metrics.to_prometheus().contains("taskflow_total_tasks 0"));
  }
}
