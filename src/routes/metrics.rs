use std::sync::Arc;

use warp::Filter;

use super::{reject, with_store};
use crate::metrics::TaskMetrics;
use crate::store::Store;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub fn json_route(store: Arc<dyn Store>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("metrics")
    .and(warp::path::end())
    .and(warp::get())
    .and(with_store(store))
    .and_then(handle_json)
}

pub fn prometheus_route(store: Arc<dyn Store>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("prometheus-metrics")
    .and(warp::path::end())
    .and(warp::get())
    .and(with_store(store))
    .and_then(handle_prometheus)
}

async fn collect(store: &Arc<dyn Store>) -> Result<TaskMetrics, warp::Rejection> {
  let tasks = store.list_tasks().await.map_err(reject)?;
  Ok(TaskMetrics::from_tasks(&tasks))
}

async fn handle_json(store: Arc<dyn Store>) -> Result<impl warp::Reply, warp::Rejection> {
  Ok(warp::reply::json(&collect(&store).await?))
}

async fn handle_prometheus(store: Arc<dyn Store>) -> Result<impl warp::Reply, warp::Rejection> {
  let body = collect(&store).await?.to_prometheus();
  Ok(warp::reply::with_header(body, "content-type", PROMETHEUS_CONTENT_TYPE))
}
