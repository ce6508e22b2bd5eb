use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::info;
use warp::Filter;

use super::{ApiError, reject, with_store};
use crate::models::NewTask;
use crate::store::Store;

const RECENT_TASKS: i64 = 20;
const MAX_COMMAND_LEN: usize = 8 * 1024;

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
  pub command: String,
  pub scheduled_at: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
  pub task_id: i64,
}

/// Parse an intake timestamp. Values without an offset are taken as UTC.
pub fn parse_scheduled_at(raw: &str) -> Result<DateTime<Utc>, ApiError> {
  let raw = raw.trim();
  if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
    return Ok(dt.with_timezone(&Utc));
  }
  for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
      return Ok(naive.and_utc());
    }
  }
  Err(ApiError::bad_request(format!("Invalid scheduled_at '{}'", raw)))
}

pub fn validate(request: ScheduleRequest) -> Result<NewTask, ApiError> {
  let command = request.command.trim();
  if command.is_empty() {
    return Err(ApiError::bad_request("command must not be empty"));
  }
  if command.len() > MAX_COMMAND_LEN {
    return Err(ApiError::bad_request("command is too long"));
  }
  Ok(NewTask {
    command: command.to_string(),
    scheduled_at: parse_scheduled_at(&request.scheduled_at)?,
  })
}

pub fn schedule_route(store: Arc<dyn Store>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("schedule")
    .and(warp::path::end())
    .and(warp::post())
    .and(warp::body::content_length_limit(64 * 1024))
    .and(warp::body::json())
    .and(with_store(store))
    .and_then(handle_schedule)
}

async fn handle_schedule(request: ScheduleRequest, store: Arc<dyn Store>) -> Result<impl warp::Reply, warp::Rejection> {
  let new_task = validate(request).map_err(reject)?;
  let task = store.create_task(new_task).await.map_err(reject)?;
  info!(task_id = task.id, scheduled_at = %task.scheduled_at, "Task scheduled");
  Ok(warp::reply::json(&task))
}

pub fn status_route(store: Arc<dyn Store>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("status")
    .and(warp::path::end())
    .and(warp::get())
    .and(warp::query::<StatusQuery>())
    .and(with_store(store))
    .and_then(handle_status)
}

async fn handle_status(query: StatusQuery, store: Arc<dyn Store>) -> Result<impl warp::Reply, warp::Rejection> {
  match store.get_task(query.task_id).await.map_err(reject)? {
    Some(task) => Ok(warp::reply::json(&task)),
    None => Err(reject(ApiError::not_found("Task not found"))),
  }
}

pub fn list_route(store: Arc<dyn Store>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("tasks")
    .and(warp::path::end())
    .and(warp::get())
    .and(with_store(store))
    .and_then(handle_list)
}

async fn handle_list(store: Arc<dyn Store>) -> Result<impl warp::Reply, warp::Rejection> {
  let tasks = store.recent_tasks(RECENT_TASKS).await.map_err(reject)?;
  Ok(warp::reply::json(&tasks))
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn offsets_are_normalized_to_utc() {
    let parsed = parse_scheduled_at("2025-03-01T12:00:00+02:00").unwrap();
    assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap());
  }

  #[test]
  fn naive_timestamps_are_taken_as_utc() {
    let expected = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    assert_eq!(parse_scheduled_at("2025-03-01T12:00:00").unwrap(), expected);
    assert_eq!(parse_scheduled_at("2025-03-01 12:00:00").unwrap(), expected);
    assert_eq!(parse_scheduled_at("2025-03-01T12:00").unwrap(), expected);
  }

  #[test]
  fn garbage_is_rejected() {
    assert!(parse_scheduled_at("tomorrow").is_err());
  }

  #[test]
  fn blank_command_is_rejected() {
    let err = validate(ScheduleRequest { command: "   ".into(), scheduled_at: "2025-03-01T12:00:00Z".into() }).unwrap_err();
    assert_eq!(err.status, warp::http::StatusCode::BAD_REQUEST);
  }
}
