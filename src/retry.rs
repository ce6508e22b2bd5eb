//! Retry and backoff policy for failed dispatches.

use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_retries: u32,
  pub base_delay: Duration,
  pub backoff: bool,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 3,
      base_delay: Duration::from_secs(60),
      backoff: true,
    }
  }
}

/// What a dispatch failure does to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
  Retry { retry_count: i32, retry_at: DateTime<Utc> },
  Fail { retry_count: i32 },
}

impl RetryPolicy {
  /// Delay before retry attempt `attempt` (1-indexed).
  pub fn delay_for(&self, attempt: u32) -> Duration {
    if !self.backoff || attempt <= 1 {
      return self.base_delay;
    }
    let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
    self.base_delay.saturating_mul(factor)
  }

  /// Decide the next state for a task that has already failed `retry_count` dispatches.
  pub fn decide(&self, retry_count: i32, now: DateTime<Utc>) -> RetryDecision {
    let max = i32::try_from(self.max_retries).unwrap_or(i32::MAX);
    let next = retry_count.max(0).saturating_add(1);
    if next < max {
      let retry_at = chrono::Duration::from_std(self.delay_for(next as u32))
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
      RetryDecision::Retry { retry_count: next, retry_at }
    } else {
      // A count already past a lowered maximum is kept, never decreased.
      RetryDecision::Fail { retry_count: next.min(max).max(retry_count.max(0)) }
    }
  }
}
