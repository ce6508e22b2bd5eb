use std::convert::Infallible;
use std::sync::Arc;

use serde_json::json;
use tracing::error;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::config::ApiConfig;
use crate::error::TaskflowError;
use crate::store::Store;

pub mod metrics;
pub mod sse;
pub mod tasks;
pub mod workers;

#[derive(Debug)]
pub struct ApiError {
  pub status: StatusCode,
  pub detail: String,
}

impl ApiError {
  pub fn bad_request(detail: impl Into<String>) -> Self {
    Self { status: StatusCode::BAD_REQUEST, detail: detail.into() }
  }

  pub fn not_found(detail: impl Into<String>) -> Self {
    Self { status: StatusCode::NOT_FOUND, detail: detail.into() }
  }
}

impl From<TaskflowError> for ApiError {
  fn from(e: TaskflowError) -> Self {
    match e {
      TaskflowError::NotFound(_) => Self::not_found("Task not found"),
      TaskflowError::Validation(detail) => Self::bad_request(detail),
      other => {
        error!(error = %other, "Request failed");
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, detail: "Internal server error".into() }
      }
    }
  }
}

impl warp::reject::Reject for ApiError {}

pub fn reject(e: impl Into<ApiError>) -> Rejection {
  warp::reject::custom(e.into())
}

pub fn with_store(store: Arc<dyn Store>) -> impl Filter<Extract = (Arc<dyn Store>,), Error = Infallible> + Clone {
  warp::any().map(move || store.clone())
}

pub fn routes(
  store: Arc<dyn Store>,
  config: ApiConfig,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  let root = warp::path::end()
    .and(warp::get())
    .map(|| warp::reply::json(&json!({ "message": "Taskflow scheduler running" })));
  let health = warp::path("health")
    .and(warp::path::end())
    .and(warp::get())
    .map(|| warp::reply::json(&json!({ "status": "ok", "service": "scheduler" })));

  let api = warp::path("api").and(
    tasks::schedule_route(store.clone())
      .or(tasks::status_route(store.clone()))
      .or(tasks::list_route(store.clone()))
      .or(workers::list_route(store.clone()))
      .or(metrics::json_route(store.clone()))
      .or(metrics::prometheus_route(store.clone()))
      .or(sse::events_route(store)),
  );

  let cors = warp::cors()
    .allow_methods(vec!["GET", "POST", "OPTIONS"])
    .allow_headers(vec!["content-type"]);
  let cors = match &config.allowed_origins {
    Some(origins) => cors.allow_origins(origins.iter().map(String::as_str)),
    None => cors.allow_any_origin(),
  };

  root.or(health).or(api).recover(handle_rejection).with(cors)
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
  let (status, detail) = if err.is_not_found() {
    (StatusCode::NOT_FOUND, "Not found".to_string())
  } else if let Some(e) = err.find::<ApiError>() {
    (e.status, e.detail.clone())
  } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
    (StatusCode::BAD_REQUEST, e.to_string())
  } else if err.find::<warp::reject::InvalidQuery>().is_some() {
    (StatusCode::BAD_REQUEST, "Invalid query string".to_string())
  } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
    (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large".to_string())
  } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
    (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
  } else {
    error!(rejection = ?err, "Unhandled rejection");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
  };

  Ok(warp::reply::with_status(warp::reply::json(&json!({ "detail": detail })), status))
}
