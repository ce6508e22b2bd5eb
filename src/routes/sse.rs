use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{Stream, StreamExt, future};
use serde_json::json;
use tokio_stream::wrappers::IntervalStream;
use tracing::warn;
use warp::Filter;
use warp::sse::Event;

use super::with_store;
use crate::models::Worker;
use crate::store::Store;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub fn events_route(store: Arc<dyn Store>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("events")
    .and(warp::path::end())
    .and(warp::get())
    .and(with_store(store))
    .map(|store: Arc<dyn Store>| {
      warp::sse::reply(warp::sse::keep_alive().stream(worker_events(store, POLL_INTERVAL)))
    })
}

/// Worker table snapshots, emitted only when they differ from the previous one.
pub fn worker_events(
  store: Arc<dyn Store>,
  poll: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
  IntervalStream::new(tokio::time::interval(poll))
    .then(move |_| {
      let store = store.clone();
      async move { store.list_workers().await }
    })
    .scan(None::<Vec<Worker>>, |last, snapshot| {
      let event = match snapshot {
        Ok(workers) if last.as_ref() != Some(&workers) => {
          let data = json!({ "workers": &workers, "ts": Utc::now() }).to_string();
          *last = Some(workers);
          Some(Event::default().event("workers").data(data))
        }
        Ok(_) => None,
        Err(e) => {
          warn!(error = %e, "Worker snapshot failed");
          Some(Event::default().event("error").data(json!({ "msg": "db error" }).to_string()))
        }
      };
      future::ready(Some(event))
    })
    .filter_map(|event| future::ready(event.map(Ok)))
}
