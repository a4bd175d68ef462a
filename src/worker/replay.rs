//! Replay of queued mutations.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::message::SyncReport;
use crate::api::{Transport, TransportError};
use crate::config::RetryConfig;
use crate::error::OfflineError;
use crate::store::{Collection, DurableStore, MutationStatus, PendingMutation, StoreExt};

/// Exponential backoff with a cap, plus the attempt count after which a
/// mutation is flagged as stalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub base_delay: Duration,
  pub max_delay: Duration,
  pub max_attempts: u32,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::from_config(&RetryConfig::default())
  }
}

impl RetryPolicy {
  pub fn from_config(config: &RetryConfig) -> Self {
    Self {
      base_delay: Duration::from_secs(config.base_delay_secs),
      max_delay: Duration::from_secs(config.max_delay_secs),
      max_attempts: config.max_attempts,
    }
  }

  /// Delay before the next attempt, after `attempt` attempts have been made.
  pub fn backoff(&self, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    self
      .base_delay
      .checked_mul(1u32 << exponent)
      .unwrap_or(self.max_delay)
      .min(self.max_delay)
  }
}

/// Drains the mutation queue against the network.
pub struct ReplayExecutor<T> {
  store: Arc<dyn DurableStore>,
  transport: Arc<T>,
  policy: RetryPolicy,
  timeout: Duration,
}

impl<T: Transport> ReplayExecutor<T> {
  pub fn new(
    store: Arc<dyn DurableStore>,
    transport: Arc<T>,
    policy: RetryPolicy,
    timeout: Duration,
  ) -> Self {
    Self {
      store,
      transport,
      policy,
      timeout,
    }
  }

  /// Replay every due mutation, oldest first.
  ///
  /// Stops attempting after the first connectivity failure; the rest of the
  /// queue is left untouched and counted as deferred.
  pub async fn drain(&self, now: DateTime<Utc>) -> Result<SyncReport, OfflineError> {
    let queue = self.store.get_all::<PendingMutation>()?;
    let mut report = SyncReport::default();
    let mut offline = false;

    for item in queue.iter() {
      let mut mutation = match item {
        Ok(m) => m,
        Err(e) => {
          tracing::warn!(error = %e, "skipping undecodable mutation");
          continue;
        }
      };

      if mutation.status == MutationStatus::Rejected {
        continue;
      }
      if offline || !mutation.is_due(now) {
        report.deferred += 1;
        continue;
      }

      match self.replay_one(&mut mutation, now).await {
        Ok(()) => report.replayed += 1,
        Err(OfflineError::ReplayFailed { id, source }) => {
          report.failed += 1;
          if source.is_connectivity() {
            tracing::debug!(%id, "connectivity lost during replay, deferring the rest");
            offline = true;
          } else {
            tracing::warn!(%id, error = %source, status = ?mutation.status, "replay failed");
          }
        }
        Err(e) => return Err(e),
      }
    }

    // Second pass over the store for the final picture
    let after = self.store.get_all::<PendingMutation>()?;
    report.remaining = after.len();
    for m in after.decoded() {
      match m.status {
        MutationStatus::Stalled => report.stalled += 1,
        MutationStatus::Rejected => report.rejected += 1,
        MutationStatus::Pending => {}
      }
    }

    tracing::info!(
      replayed = report.replayed,
      failed = report.failed,
      deferred = report.deferred,
      remaining = report.remaining,
      "queue drained"
    );
    Ok(report)
  }

  /// One delivery attempt. The attempt is persisted before the request goes out
  /// so a crash mid-flight still counts it.
  async fn replay_one(
    &self,
    mutation: &mut PendingMutation,
    now: DateTime<Utc>,
  ) -> Result<(), OfflineError> {
    mutation.attempt_count += 1;
    self.store.put(mutation)?;

    let request = mutation.to_request();
    let result = match tokio::time::timeout(self.timeout, self.transport.send(&request)).await {
      Ok(result) => result,
      Err(_) => Err(TransportError::Timeout),
    };

    match result {
      Ok(_) => {
        self
          .store
          .delete(Collection::Mutations, &mutation.id.to_string())?;
        tracing::debug!(id = %mutation.id, attempts = mutation.attempt_count, "mutation delivered");
        Ok(())
      }
      Err(source) => {
        mutation.last_error = Some(source.to_string());
        if !source.is_retryable() {
          mutation.status = MutationStatus::Rejected;
        } else {
          // Connectivity failures wait for the next connectivity trigger, not a timer
          if !source.is_connectivity() {
            mutation.next_attempt_at = now + chrono_delay(self.policy.backoff(mutation.attempt_count));
          }
          if mutation.attempt_count >= self.policy.max_attempts {
            mutation.status = MutationStatus::Stalled;
          }
        }
        self.store.put(mutation)?;
        Err(OfflineError::ReplayFailed {
          id: mutation.id,
          source,
        })
      }
    }
  }
}

fn chrono_delay(d: Duration) -> chrono::Duration {
  chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(1))
}
