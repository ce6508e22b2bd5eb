use std::env;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::error::{Result, TaskflowError};
use crate::heartbeat::{SUFFIX_LEN, valid_worker_name};
use crate::protocol::MAX_HOSTNAME_LEN;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
  pub poll_interval: Duration,
  pub retry: RetryPolicy,
  /// Base URL of the worker's task-execution endpoint.
  pub worker_url: String,
  /// Transport attempts per dispatch before it counts as failed.
  pub network_attempts: usize,
  pub network_retry_delay: Duration,
  pub request_timeout: Option<Duration>,
}

impl Default for DispatchConfig {
  fn default() -> Self {
    Self {
      poll_interval: Duration::from_secs(5),
      retry: RetryPolicy::default(),
      worker_url: "http://localhost:50051".into(),
      network_attempts: 2,
      network_retry_delay: Duration::from_secs(2),
      request_timeout: None,
    }
  }
}

#[derive(Debug, Clone)]
pub struct ReaperConfig {
  pub heartbeat_timeout: Duration,
  pub interval: Duration,
}

impl Default for ReaperConfig {
  fn default() -> Self {
    Self {
      heartbeat_timeout: Duration::from_secs(30),
      interval: Duration::from_secs(30),
    }
  }
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
  pub worker_name: String,
  /// Base URL of the coordinator's heartbeat endpoint.
  pub coordinator_url: String,
  pub interval: Duration,
}

impl Default for HeartbeatConfig {
  fn default() -> Self {
    Self {
      worker_name: "Default-Worker".into(),
      coordinator_url: "http://localhost:50052".into(),
      interval: Duration::from_secs(10),
    }
  }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
  pub port: u16,
  pub concurrency: usize,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self { port: 50051, concurrency: 3 }
  }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
  pub port: u16,
  /// `None` allows any origin.
  pub allowed_origins: Option<Vec<String>>,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self { port: 8080, allowed_origins: None }
  }
}

#[derive(Debug, Clone)]
pub struct Config {
  pub database_url: String,
  pub dispatch: DispatchConfig,
  pub reaper: ReaperConfig,
  pub heartbeat: HeartbeatConfig,
  /// Port the coordinator listens on for heartbeats.
  pub heartbeat_port: u16,
  pub worker: WorkerConfig,
  pub api: ApiConfig,
}

impl Config {
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|key| env::var(key).ok())
  }

  /// Build the configuration from any key lookup; `from_env` passes the process environment.
  pub fn from_lookup<F>(lookup: F) -> Result<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    let database_url = lookup("DATABASE_URL").ok_or_else(|| TaskflowError::Config {
      key: "DATABASE_URL".into(),
      message: "must be set".into(),
    })?;

    let heartbeat_timeout = nonzero_secs(&lookup, "HEARTBEAT_TIMEOUT", 30)?;
    let worker_host = lookup("WORKER_HOST").unwrap_or_else(|| "localhost".into());
    let worker_port: u16 = parsed(&lookup, "WORKER_PORT", 50051)?;
    let coordinator_host = lookup("COORDINATOR_HOST").unwrap_or_else(|| "localhost".into());
    let heartbeat_port: u16 = parsed(&lookup, "COORDINATOR_HEARTBEAT_PORT", 50052)?;

    let network_attempts: usize = parsed(&lookup, "DISPATCH_NETWORK_RETRIES", 2)?;
    if network_attempts == 0 {
      return Err(TaskflowError::Config {
        key: "DISPATCH_NETWORK_RETRIES".into(),
        message: "must be at least 1".into(),
      });
    }
    let concurrency: usize = parsed(&lookup, "WORKER_CONCURRENCY", 3)?;
    if concurrency == 0 {
      return Err(TaskflowError::Config {
        key: "WORKER_CONCURRENCY".into(),
        message: "must be at least 1".into(),
      });
    }

    let worker_name = lookup("WORKER_NAME").unwrap_or_else(|| "Default-Worker".into());
    if !valid_worker_name(&worker_name) {
      return Err(TaskflowError::Config {
        key: "WORKER_NAME".into(),
        message: format!(
          "'{}' must be 1-{} characters of [A-Za-z0-9._-]",
          worker_name,
          MAX_HOSTNAME_LEN - SUFFIX_LEN - 1
        ),
      });
    }

    Ok(Self {
      database_url,
      dispatch: DispatchConfig {
        poll_interval: secs(&lookup, "CHECK_INTERVAL", 5)?,
        retry: RetryPolicy {
          max_retries: parsed(&lookup, "TASK_MAX_RETRIES", 3)?,
          base_delay: secs(&lookup, "RETRY_DELAY", 60)?,
          backoff: flag(&lookup, "RETRY_BACKOFF", true)?,
        },
        worker_url: format!("http://{}:{}", worker_host, worker_port),
        network_attempts,
        network_retry_delay: secs(&lookup, "DISPATCH_RETRY_DELAY", 2)?,
        request_timeout: match parsed::<u64, _>(&lookup, "DISPATCH_REQUEST_TIMEOUT", 0)? {
          0 => None,
          n => Some(Duration::from_secs(n)),
        },
      },
      reaper: ReaperConfig {
        heartbeat_timeout,
        interval: match lookup("REAPER_INTERVAL") {
          Some(_) => nonzero_secs(&lookup, "REAPER_INTERVAL", 30)?,
          None => heartbeat_timeout,
        },
      },
      heartbeat: HeartbeatConfig {
        worker_name,
        coordinator_url: format!("http://{}:{}", coordinator_host, heartbeat_port),
        interval: nonzero_secs(&lookup, "WORKER_HEARTBEAT_INTERVAL", 10)?,
      },
      heartbeat_port,
      worker: WorkerConfig { port: worker_port, concurrency },
      api: ApiConfig {
        port: parsed(&lookup, "SERVER_PORT", 8080)?,
        allowed_origins: origins(lookup("ALLOWED_ORIGINS"))?,
      },
    })
  }
}

fn parsed<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
  T: FromStr,
  T::Err: std::fmt::Display,
  F: Fn(&str) -> Option<String>,
{
  match lookup(key) {
    Some(raw) => raw.trim().parse().map_err(|e: T::Err| TaskflowError::Config {
      key: key.to_string(),
      message: format!("'{}': {}", raw, e),
    }),
    None => Ok(default),
  }
}

fn secs<F>(lookup: &F, key: &str, default: u64) -> Result<Duration>
where
  F: Fn(&str) -> Option<String>,
{
  parsed(lookup, key, default).map(Duration::from_secs)
}

/// Interval settings; tokio timers reject a zero period.
fn nonzero_secs<F>(lookup: &F, key: &str, default: u64) -> Result<Duration>
where
  F: Fn(&str) -> Option<String>,
{
  let value = secs(lookup, key, default)?;
  if value.is_zero() {
    return Err(TaskflowError::Config {
      key: key.to_string(),
      message: "must be at least 1 second".into(),
    });
  }
  Ok(value)
}

fn flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
  F: Fn(&str) -> Option<String>,
{
  match lookup(key).map(|raw| raw.trim().to_ascii_lowercase()) {
    None => Ok(default),
    Some(raw) => match raw.as_str() {
      "1" | "true" | "yes" | "on" => Ok(true),
      "0" | "false" | "no" | "off" => Ok(false),
      _ => Err(TaskflowError::Config {
        key: key.to_string(),
        message: format!("'{}' is not a boolean", raw),
      }),
    },
  }
}

static ORIGIN: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^https?://[A-Za-z0-9.-]+(:[0-9]{1,5})?$").expect("origin pattern is valid")
});

/// `*` or unset means any origin.
fn origins(raw: Option<String>) -> Result<Option<Vec<String>>> {
  let Some(raw) = raw else {
    return Ok(None);
  };
  if raw.trim().is_empty() || raw.trim() == "*" {
    return Ok(None);
  }
  let origins: Vec<String> = raw
    .split(',')
    .map(|o| o.trim().to_string())
    .filter(|o| !o.is_empty())
    .collect();
  if let Some(bad) = origins.iter().find(|o| !ORIGIN.is_match(o)) {
    return Err(TaskflowError::Config {
      key: "ALLOWED_ORIGINS".into(),
      message: format!("'{}' is not a scheme://host[:port] origin", bad),
    });
  }
  Ok(Some(origins))
}
