use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::HeartbeatConfig;
use crate::error::Result;
use crate::protocol::{DispatchError, HeartbeatResponse, MAX_HOSTNAME_LEN, RpcClient, valid_hostname};

/// Length of the random part appended to the worker name.
pub const SUFFIX_LEN: usize = 6;

/// Per-process worker identity: the configured base name plus a short random
/// suffix, so two instances sharing a name still get separate rows.
pub fn worker_identity(base_name: &str) -> String {
  let suffix = Uuid::new_v4().simple().to_string();
  format!("{}-{}", base_name, &suffix[..SUFFIX_LEN])
}

/// Whether `base_name` still makes a hostname the coordinator accepts once the
/// `-xxxxxx` suffix is appended.
pub fn valid_worker_name(base_name: &str) -> bool {
  base_name.len() + 1 + SUFFIX_LEN <= MAX_HOSTNAME_LEN && valid_hostname(base_name)
}

/// Periodically announces this worker to the coordinator.
pub struct HeartbeatSender {
  client: RpcClient,
  hostname: String,
  interval: Duration,
}

impl HeartbeatSender {
  pub fn new(config: &HeartbeatConfig) -> Result<Self> {
    Ok(Self {
      client: RpcClient::new(&config.coordinator_url, Some(config.interval.max(Duration::from_secs(1))))?,
      hostname: worker_identity(&config.worker_name),
      interval: config.interval,
    })
  }

  pub fn hostname(&self) -> &str {
    &self.hostname
  }

  pub async fn send_once(&self) -> std::result::Result<HeartbeatResponse, DispatchError> {
    self.client.heartbeat(&self.hostname).await
  }

  /// Send heartbeats until `shutdown` fires. Failures are logged and the loop keeps going.
  pub async fn run(&self, shutdown: CancellationToken) {
    info!(hostname = %self.hostname, coordinator = %self.client.base_url(), "Heartbeat sender started");
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        _ = shutdown.cancelled() => break,
        _ = ticker.tick() => {
          match self.send_once().await {
            Ok(_) => info!(hostname = %self.hostname, "Sent heartbeat"),
            Err(e) => warn!(hostname = %self.hostname, error = %e, "Heartbeat failed"),
          }
        }
      }
    }
    info!(hostname = %self.hostname, "Heartbeat sender stopped");
  }
}
