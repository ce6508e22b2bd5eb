//! Dead-worker reaper.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ReaperConfig;
use crate::error::Result;
use crate::models::Worker;
use crate::store::Store;

pub struct Reaper {
  store: Arc<dyn Store>,
  config: ReaperConfig,
}

impl Reaper {
  pub fn new(store: Arc<dyn Store>, config: ReaperConfig) -> Self {
    Self { store, config }
  }

  /// Mark every alive worker silent for at least the heartbeat timeout as dead.
  /// Workers are never revived here; the next heartbeat does that.
  pub async fn run_once(&self, now: DateTime<Utc>) -> Result<Vec<Worker>> {
    let threshold = chrono::Duration::from_std(self.config.heartbeat_timeout)
      .ok()
      .and_then(|timeout| now.checked_sub_signed(timeout))
      .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let reaped = self.store.reap_dead_workers(threshold).await?;
    for worker in &reaped {
      warn!(hostname = %worker.hostname, last_heartbeat = %worker.last_heartbeat, "Worker marked as dead");
    }
    Ok(reaped)
  }

  pub async fn run(&self, shutdown: CancellationToken) {
    info!(timeout = ?self.config.heartbeat_timeout, "Dead-worker reaper started");
    let mut ticker = tokio::time::interval(self.config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        _ = shutdown.cancelled() => break,
        _ = ticker.tick() => {
          if let Err(e) = self.run_once(Utc::now()).await {
            error!(error = %e, "Reaper cycle failed");
          }
        }
      }
    }
    info!("Dead-worker reaper stopped");
  }
}
