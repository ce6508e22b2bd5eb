use std::sync::Arc;

use warp::Filter;

use super::{reject, with_store};
use crate::store::Store;

pub fn list_route(store: Arc<dyn Store>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("workers")
    .and(warp::path::end())
    .and(warp::get())
    .and(with_store(store))
    .and_then(handle_list)
}

async fn handle_list(store: Arc<dyn Store>) -> Result<impl warp::Reply, warp::Rejection> {
  let workers = store.list_workers().await.map_err(reject)?;
  Ok(warp::reply::json(&workers))
}
