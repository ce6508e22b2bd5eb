#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use taskflow::config::DispatchConfig;
use taskflow::executor::Executor;
use taskflow::models::{NewTask, Task};
use taskflow::retry::RetryPolicy;
use taskflow::rpc::{heartbeat_routes, worker_routes};
use taskflow::store::{MemoryStore, Store};

pub async fn schedule(store: &MemoryStore, command: &str, at: DateTime<Utc>) -> Task {
  store
    .create_task(NewTask { command: command.to_string(), scheduled_at: at })
    .await
    .expect("create task")
}

pub async fn reload(store: &MemoryStore, id: i64) -> Task {
  store.get_task(id).await.expect("get task").expect("task exists")
}

/// An address nothing listens on.
pub fn unused_addr() -> SocketAddr {
  let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
  listener.local_addr().expect("probe address")
}

pub fn spawn_worker(store: Arc<MemoryStore>, concurrency: usize) -> SocketAddr {
  let executor = Arc::new(Executor::new(store, concurrency));
  let (addr, server) = warp::serve(worker_routes(executor)).bind_ephemeral(([127, 0, 0, 1], 0));
  tokio::spawn(server);
  addr
}

pub fn spawn_coordinator(store: Arc<MemoryStore>) -> SocketAddr {
  let (addr, server) = warp::serve(heartbeat_routes(store)).bind_ephemeral(([127, 0, 0, 1], 0));
  tokio::spawn(server);
  addr
}

/// Dispatch settings with the network retry delay shrunk for tests.
pub fn dispatch_config(worker: SocketAddr) -> DispatchConfig {
  DispatchConfig {
    poll_interval: Duration::from_millis(20),
    retry: RetryPolicy { max_retries: 3, base_delay: Duration::from_secs(60), backoff: true },
    worker_url: format!("http://{}", worker),
    network_attempts: 2,
    network_retry_delay: Duration::from_millis(10),
    request_timeout: Some(Duration::from_secs(10)),
  }
}
