mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskflow::dispatcher::Dispatcher;
use taskflow::error::{Result as StoreResult, TaskflowError};
use taskflow::models::{NewTask, Task, TaskOutcome, TaskStatus, Worker};
use taskflow::protocol::{DispatchError, TaskDispatcher, TaskRequest, TaskResponse};
use taskflow::retry::RetryPolicy;
use taskflow::store::{MemoryStore, Store};
use tokio_test::assert_ok;
use warp::Filter;
use warp::http::StatusCode;

use common::{dispatch_config, reload, schedule, unused_addr};

/// Accepts every dispatch without running anything.
#[derive(Default)]
struct AcceptingDispatcher {
  calls: AtomicUsize,
}

#[async_trait]
impl TaskDispatcher for AcceptingDispatcher {
  async fn execute_task(&self, request: &TaskRequest) -> Result<TaskResponse, DispatchError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    Ok(TaskResponse { id: request.id, status: "done".into(), message: "accepted".into() })
  }
}

/// Fails every dispatch with a rejection.
struct RejectingDispatcher;

#[async_trait]
impl TaskDispatcher for RejectingDispatcher {
  async fn execute_task(&self, _request: &TaskRequest) -> Result<TaskResponse, DispatchError> {
    Err(DispatchError::Rejected { status: 503, message: "unavailable".into() })
  }
}

/// Records a worker outcome for the task, then reports a transport failure,
/// the way a reply lost after execution looks to the coordinator.
struct LostReplyDispatcher {
  store: Arc<MemoryStore>,
}

#[async_trait]
impl TaskDispatcher for LostReplyDispatcher {
  async fn execute_task(&self, request: &TaskRequest) -> Result<TaskResponse, DispatchError> {
    self
      .store
      .finish_task(request.id, &TaskOutcome::Done("ok".into()), Utc::now())
      .await
      .expect("finish task");
    Err(DispatchError::Rejected { status: 502, message: "reply lost".into() })
  }
}

/// MemoryStore that fails the claim of one task and the failure write of another.
struct FlakyStore {
  inner: MemoryStore,
  claim_fails_for: i64,
  failure_write_fails_for: i64,
}

fn store_offline() -> TaskflowError {
  TaskflowError::Io(std::io::Error::other("connection reset"))
}

#[async_trait]
impl Store for FlakyStore {
  async fn create_task(&self, task: NewTask) -> StoreResult<Task> {
    self.inner.create_task(task).await
  }

  async fn get_task(&self, id: i64) -> StoreResult<Option<Task>> {
    self.inner.get_task(id).await
  }

  async fn recent_tasks(&self, limit: i64) -> StoreResult<Vec<Task>> {
    self.inner.recent_tasks(limit).await
  }

  async fn list_tasks(&self) -> StoreResult<Vec<Task>> {
    self.inner.list_tasks().await
  }

  async fn due_tasks(&self, now: DateTime<Utc>) -> StoreResult<Vec<Task>> {
    self.inner.due_tasks(now).await
  }

  async fn claim_task(&self, id: i64, now: DateTime<Utc>) -> StoreResult<Option<Task>> {
    if id == self.claim_fails_for {
      return Err(store_offline());
    }
    self.inner.claim_task(id, now).await
  }

  async fn record_dispatch_failure(
    &self,
    id: i64,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
  ) -> StoreResult<Option<Task>> {
    if id == self.failure_write_fails_for {
      return Err(store_offline());
    }
    self.inner.record_dispatch_failure(id, policy, now).await
  }

  async fn mark_task_started(&self, id: i64, now: DateTime<Utc>) -> StoreResult<bool> {
    self.inner.mark_task_started(id, now).await
  }

  async fn finish_task(&self, id: i64, outcome: &TaskOutcome, now: DateTime<Utc>) -> StoreResult<Option<Task>> {
    self.inner.finish_task(id, outcome, now).await
  }

  async fn record_heartbeat(&self, hostname: &str, now: DateTime<Utc>) -> StoreResult<Worker> {
    self.inner.record_heartbeat(hostname, now).await
  }

  async fn reap_dead_workers(&self, threshold: DateTime<Utc>) -> StoreResult<Vec<Worker>> {
    self.inner.reap_dead_workers(threshold).await
  }

  async fn list_workers(&self) -> StoreResult<Vec<Worker>> {
    self.inner.list_workers().await
  }
}

#[tokio::test]
async fn store_errors_on_one_task_do_not_abort_the_cycle() {
  let inner = MemoryStore::new();
  let now = Utc::now();
  let unclaimable = schedule(&inner, "true", now).await;
  let unrecordable = schedule(&inner, "true", now).await;
  let healthy = schedule(&inner, "true", now).await;
  let store = Arc::new(FlakyStore {
    inner,
    claim_fails_for: unclaimable.id,
    failure_write_fails_for: unrecordable.id,
  });
  let dispatcher = Dispatcher::new(store.clone(), Arc::new(RejectingDispatcher), dispatch_config(unused_addr()));

  let report = assert_ok!(dispatcher.run_cycle(now).await);
  assert_eq!((report.due, report.errors, report.retrying), (3, 2, 1));

  assert_eq!(reload(&store.inner, unclaimable.id).await.status, TaskStatus::Scheduled);
  assert_eq!(reload(&store.inner, unrecordable.id).await.status, TaskStatus::Running);
  let healthy = reload(&store.inner, healthy.id).await;
  assert_eq!(healthy.status, TaskStatus::Retrying);
  assert_eq!(healthy.retry_count, 1);

  let report = assert_ok!(dispatcher.run_cycle(now + chrono::Duration::seconds(1)).await);
  assert_eq!((report.due, report.errors), (1, 1), "the unclaimed task comes back next cycle");
}

#[tokio::test]
async fn unreachable_worker_walks_backoff_then_fails() {
  let store = Arc::new(MemoryStore::new());
  let dispatcher = assert_ok!(Dispatcher::with_rpc(store.clone(), dispatch_config(unused_addr())));
  let t0 = Utc::now();
  let task = schedule(&store, "echo ok", t0).await;

  let report = assert_ok!(dispatcher.run_cycle(t0).await);
  assert_eq!((report.due, report.retrying, report.failed), (1, 1, 0));
  let first = reload(&store, task.id).await;
  assert_eq!(first.status, TaskStatus::Retrying);
  assert_eq!(first.retry_count, 1);
  assert!(first.picked_at.is_some());
  let retry_at = first.retry_at.expect("retry_at set while retrying");
  assert!(retry_at >= t0 + chrono::Duration::seconds(60));
  assert!(retry_at <= Utc::now() + chrono::Duration::seconds(60));

  let report = assert_ok!(dispatcher.run_cycle(t0 + chrono::Duration::seconds(30)).await);
  assert_eq!(report.due, 0, "not due before retry_at");

  assert_ok!(dispatcher.run_cycle(retry_at).await);
  let second = reload(&store, task.id).await;
  assert_eq!(second.status, TaskStatus::Retrying);
  assert_eq!(second.retry_count, 2);
  assert_eq!(second.retry_at, Some(retry_at + chrono::Duration::seconds(120)));

  let report = assert_ok!(dispatcher.run_cycle(retry_at + chrono::Duration::seconds(120)).await);
  assert_eq!(report.failed, 1);
  let last = reload(&store, task.id).await;
  assert_eq!(last.status, TaskStatus::Failed);
  assert_eq!(last.retry_count, 3);
  assert!(last.failed_at.is_some());
  assert!(last.completed_at.is_none());
  assert!(last.retry_at.is_none());

  let report = assert_ok!(dispatcher.run_cycle(t0 + chrono::Duration::days(1)).await);
  assert_eq!(report.due, 0, "failed tasks are never picked up again");
}

#[tokio::test]
async fn rejected_dispatch_is_retried_in_process_before_counting() {
  let hits = Arc::new(AtomicUsize::new(0));
  let counter = hits.clone();
  let unavailable = warp::path("execute").map(move || {
    counter.fetch_add(1, Ordering::SeqCst);
    warp::reply::with_status("busy", StatusCode::SERVICE_UNAVAILABLE)
  });
  let (addr, server) = warp::serve(unavailable).bind_ephemeral(([127, 0, 0, 1], 0));
  tokio::spawn(server);

  let store = Arc::new(MemoryStore::new());
  let dispatcher = Dispatcher::with_rpc(store.clone(), dispatch_config(addr)).unwrap();
  let now = Utc::now();
  let task = schedule(&store, "true", now).await;

  dispatcher.run_cycle(now).await.unwrap();
  assert_eq!(hits.load(Ordering::SeqCst), 2);
  let task = reload(&store, task.id).await;
  assert_eq!(task.status, TaskStatus::Retrying);
  assert_eq!(task.retry_count, 1);
}

#[tokio::test]
async fn future_tasks_wait_for_their_schedule() {
  let store = Arc::new(MemoryStore::new());
  let client = Arc::new(AcceptingDispatcher::default());
  let dispatcher = Dispatcher::new(store.clone(), client.clone(), dispatch_config(unused_addr()));
  let now = Utc::now();
  let task = schedule(&store, "true", now + chrono::Duration::seconds(45)).await;

  let report = dispatcher.run_cycle(now).await.unwrap();
  assert_eq!(report.due, 0);
  let untouched = reload(&store, task.id).await;
  assert_eq!(untouched.status, TaskStatus::Scheduled);
  assert!(untouched.picked_at.is_none());

  dispatcher.run_cycle(now + chrono::Duration::seconds(45)).await.unwrap();
  assert_eq!(reload(&store, task.id).await.status, TaskStatus::Running);
  assert_eq!(client.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn delivered_tasks_are_not_polled_again() {
  let store = Arc::new(MemoryStore::new());
  let client = Arc::new(AcceptingDispatcher::default());
  let dispatcher = Dispatcher::new(store.clone(), client.clone(), dispatch_config(unused_addr()));
  let now = Utc::now();
  for command in ["echo a", "echo b", "echo c"] {
    schedule(&store, command, now).await;
  }

  let report = dispatcher.run_cycle(now).await.unwrap();
  assert_eq!((report.due, report.dispatched), (3, 3));
  for task in store.list_tasks().await.unwrap() {
    assert_eq!(task.status, TaskStatus::Running, "worker owns the terminal write");
    assert_eq!(task.retry_count, 0);
  }

  let report = dispatcher.run_cycle(now + chrono::Duration::seconds(600)).await.unwrap();
  assert_eq!(report.due, 0);
  assert_eq!(client.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retry_count_is_monotonic_and_bounded() {
  let store = Arc::new(MemoryStore::new());
  let mut config = dispatch_config(unused_addr());
  config.retry = RetryPolicy { max_retries: 3, base_delay: Duration::from_secs(1), backoff: false };
  let dispatcher = Dispatcher::new(store.clone(), Arc::new(RejectingDispatcher), config);
  let start = Utc::now();
  let task = schedule(&store, "true", start).await;

  let mut seen = Vec::new();
  for step in 0..10 {
    dispatcher.run_cycle(start + chrono::Duration::seconds(step * 5)).await.unwrap();
    seen.push(reload(&store, task.id).await.retry_count);
  }
  assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
  assert!(seen.iter().all(|&c| c <= 3), "{:?}", seen);

  let last = reload(&store, task.id).await;
  assert_eq!(last.status, TaskStatus::Failed);
  assert!(last.failed_at.is_some() && last.completed_at.is_none());
}

#[tokio::test]
async fn worker_outcome_wins_over_late_dispatch_failure() {
  let store = Arc::new(MemoryStore::new());
  let client = Arc::new(LostReplyDispatcher { store: store.clone() });
  let dispatcher = Dispatcher::new(store.clone(), client, dispatch_config(unused_addr()));
  let now = Utc::now();
  let task = schedule(&store, "echo ok", now).await;

  let report = dispatcher.run_cycle(now).await.unwrap();
  assert_eq!((report.retrying, report.failed), (0, 0));
  let task = reload(&store, task.id).await;
  assert_eq!(task.status, TaskStatus::Done);
  assert_eq!(task.retry_count, 0);
  assert!(task.retry_at.is_none());
}

#[tokio::test]
async fn run_loop_stops_on_shutdown() {
  let store = Arc::new(MemoryStore::new());
  let dispatcher = Dispatcher::new(store, Arc::new(AcceptingDispatcher::default()), dispatch_config(unused_addr()));
  let shutdown = tokio_util::sync::CancellationToken::new();
  let token = shutdown.clone();
  let handle = tokio::spawn(async move { dispatcher.run(token).await });

  tokio::time::sleep(Duration::from_millis(50)).await;
  shutdown.cancel();
  tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}
