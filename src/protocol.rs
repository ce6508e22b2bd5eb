//! Dispatch protocol: JSON request/response pairs exchanged between the
//! coordinator and workers, plus the client side of both RPCs.
//!
//! | RPC | Served by | Path |
//! |-----|-----------|------|
//! | `ExecuteTask` | worker | `POST /execute` |
//! | `Heartbeat` | coordinator | `POST /heartbeat` |
//!
//! A transport error or non-2xx reply is a [`DispatchError`]. A 2xx reply is a
//! successful dispatch whatever status the body reports; the execution
//! outcome travels through the store, not through this response.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_retry::Retry;
use tokio_retry::strategy::FixedInterval;
use tracing::warn;

use crate::error::{Result, TaskflowError};

pub const EXECUTE_PATH: &str = "execute";
pub const HEARTBEAT_PATH: &str = "heartbeat";

/// Longest hostname the coordinator accepts in a heartbeat.
pub const MAX_HOSTNAME_LEN: usize = 128;

static HOSTNAME: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^[A-Za-z0-9._-]+$").expect("hostname pattern is valid")
});

pub fn valid_hostname(hostname: &str) -> bool {
  hostname.len() <= MAX_HOSTNAME_LEN && HOSTNAME.is_match(hostname)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
  pub id: i64,
  pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResponse {
  pub id: i64,
  pub status: String,
  pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
  pub hostname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
  pub status: String,
  pub message: String,
}

impl HeartbeatResponse {
  pub fn ack() -> Self {
    Self { status: "ack".into(), message: "Heartbeat updated".into() }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
  #[error("transport error: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("peer answered {status}: {message}")]
  Rejected { status: u16, message: String },
}

/// Sends `ExecuteTask` calls on behalf of the dispatch loop.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
  async fn execute_task(&self, request: &TaskRequest) -> std::result::Result<TaskResponse, DispatchError>;
}

#[derive(Debug, Clone)]
pub struct RpcClient {
  http: reqwest::Client,
  base_url: String,
}

impl RpcClient {
  pub fn new(base_url: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }
    let http = builder
      .build()
      .map_err(|e| TaskflowError::Transport(e.to_string()))?;
    Ok(Self {
      http,
      base_url: base_url.into().trim_end_matches('/').to_string(),
    })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  async fn call<Req, Resp>(&self, path: &str, body: &Req) -> std::result::Result<Resp, DispatchError>
  where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
  {
    let response = self
      .http
      .post(format!("{}/{}", self.base_url, path))
      .json(body)
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      let message = response.text().await.unwrap_or_default();
      return Err(DispatchError::Rejected { status: status.as_u16(), message });
    }
    Ok(response.json::<Resp>().await?)
  }

  /// One `ExecuteTask` attempt, no retries.
  pub async fn execute_task(&self, request: &TaskRequest) -> std::result::Result<TaskResponse, DispatchError> {
    self.call(EXECUTE_PATH, request).await
  }

  pub async fn heartbeat(&self, hostname: &str) -> std::result::Result<HeartbeatResponse, DispatchError> {
    self.call(HEARTBEAT_PATH, &HeartbeatRequest { hostname: hostname.to_string() }).await
  }
}

/// [`TaskDispatcher`] that retries transport failures a fixed number of times
/// with a fixed delay before giving up.
#[derive(Debug, Clone)]
pub struct RetryingDispatcher {
  client: RpcClient,
  attempts: usize,
  delay: Duration,
}

impl RetryingDispatcher {
  pub fn new(client: RpcClient, attempts: usize, delay: Duration) -> Self {
    Self { client, attempts: attempts.max(1), delay }
  }
}

#[async_trait]
impl TaskDispatcher for RetryingDispatcher {
  async fn execute_task(&self, request: &TaskRequest) -> std::result::Result<TaskResponse, DispatchError> {
    let strategy = FixedInterval::new(self.delay).take(self.attempts - 1);
    let mut attempt = 0;
    Retry::spawn(strategy, || {
      attempt += 1;
      let current = attempt;
      async move {
        let result = self.client.execute_task(request).await;
        if let Err(e) = &result {
          warn!(
            task_id = request.id,
            attempt = current,
            attempts = self.attempts,
            error = %e,
            "Dispatch attempt failed"
          );
        }
        result
      }
    })
    .await
  }
}
