//! Server side of the dispatch protocol.
//!
//! Workers serve `POST /execute`; the coordinator serves `POST /heartbeat`.
//! Both also answer `GET /health`.

use std::convert::Infallible;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};
use warp::Filter;
use warp::http::StatusCode;

use crate::executor::Executor;
use crate::protocol::{
  EXECUTE_PATH, HEARTBEAT_PATH, HeartbeatRequest, HeartbeatResponse, TaskRequest, valid_hostname,
};
use crate::store::Store;

const MAX_BODY_BYTES: u64 = 64 * 1024;

fn health(service: &'static str) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("health")
    .and(warp::path::end())
    .and(warp::get())
    .map(move || warp::reply::json(&json!({ "status": "ok", "service": service })))
}

fn with_executor(executor: Arc<Executor>) -> impl Filter<Extract = (Arc<Executor>,), Error = Infallible> + Clone {
  warp::any().map(move || executor.clone())
}

fn with_store(store: Arc<dyn Store>) -> impl Filter<Extract = (Arc<dyn Store>,), Error = Infallible> + Clone {
  warp::any().map(move || store.clone())
}

/// Task-execution endpoint served by each worker.
pub fn worker_routes(executor: Arc<Executor>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  let execute = warp::path(EXECUTE_PATH)
    .and(warp::path::end())
    .and(warp::post())
    .and(warp::body::content_length_limit(MAX_BODY_BYTES))
    .and(warp::body::json())
    .and(with_executor(executor))
    .then(handle_execute);

  execute.or(health("worker"))
}

async fn handle_execute(request: TaskRequest, executor: Arc<Executor>) -> warp::reply::Json {
  warp::reply::json(&executor.submit(request).await)
}

/// Heartbeat-reception endpoint served by the coordinator.
pub fn heartbeat_routes(store: Arc<dyn Store>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  let heartbeat = warp::path(HEARTBEAT_PATH)
    .and(warp::path::end())
    .and(warp::post())
    .and(warp::body::content_length_limit(MAX_BODY_BYTES))
    .and(warp::body::json())
    .and(with_store(store))
    .then(handle_heartbeat);

  heartbeat.or(health("coordinator"))
}

async fn handle_heartbeat(
  request: HeartbeatRequest,
  store: Arc<dyn Store>,
) -> warp::reply::WithStatus<warp::reply::Json> {
  if !valid_hostname(&request.hostname) {
    warn!(hostname = %request.hostname, "Rejected heartbeat with invalid hostname");
    return warp::reply::with_status(
      warp::reply::json(&json!({ "status": "error", "message": "invalid hostname" })),
      StatusCode::BAD_REQUEST,
    );
  }

  match store.record_heartbeat(&request.hostname, Utc::now()).await {
    Ok(worker) => {
      info!(hostname = %worker.hostname, "Heartbeat received");
      warp::reply::with_status(warp::reply::json(&HeartbeatResponse::ack()), StatusCode::OK)
    }
    Err(e) => {
      error!(hostname = %request.hostname, error = %e, "Failed to record heartbeat");
      warp::reply::with_status(
        warp::reply::json(&json!({ "status": "error", "message": "heartbeat not recorded" })),
        StatusCode::INTERNAL_SERVER_ERROR,
      )
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::WorkerStatus;
  use crate::store::MemoryStore;

  #[test]
  fn hostname_pattern() {
    assert!(valid_hostname("Default-Worker-1a2b3c"));
    assert!(valid_hostname("node.eu_1"));
    assert!(!valid_hostname(""));
    assert!(!valid_hostname("bad host"));
    assert!(valid_hostname(&"x".repeat(128)));
    assert!(!valid_hostname(&"x".repeat(129)));
  }

  #[tokio::test]
  async fn duplicate_heartbeats_keep_one_row() {
    let store = Arc::new(MemoryStore::new());
    let routes = heartbeat_routes(store.clone());

    for _ in 0..3 {
      let response = warp::test::request()
        .method("POST")
        .path("/heartbeat")
        .json(&HeartbeatRequest { hostname: "worker-a".into() })
        .reply(&routes)
        .await;
      assert_eq!(response.status(), StatusCode::OK);
      let body: HeartbeatResponse = serde_json::from_slice(response.body()).unwrap();
      assert_eq!(body, HeartbeatResponse::ack());
    }

    let workers = store.list_workers().await.unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].status, WorkerStatus::Alive);
  }

  #[tokio::test]
  async fn invalid_hostname_is_not_stored() {
    let store = Arc::new(MemoryStore::new());
    let routes = heartbeat_routes(store.clone());
    let response = warp::test::request()
      .method("POST")
      .path("/heartbeat")
      .json(&HeartbeatRequest { hostname: "no spaces allowed".into() })
      .reply(&routes)
      .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(store.list_workers().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn health_names_the_service() {
    let routes = heartbeat_routes(Arc::new(MemoryStore::new()));
    let response = warp::test::request().path("/health").reply(&routes).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["service"], "coordinator");
  }
}
