//! Relays sync triggers to the worker and tracks its acknowledgments.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

use super::{Connectivity, LifecycleSignal, Visibility};
use crate::api::Transport;
use crate::config::Config;
use crate::error::OfflineError;
use crate::store::{Collection, DurableStore, MutationStatus, PendingMutation, StoreExt};
use crate::worker::{
  MessageKind, ReplyOutcome, SyncReport, WorkerContainer, WorkerController, WorkerReply,
};

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
  pub sync_interval: Duration,
  /// Worker script update checks; never triggers a sync
  pub update_interval: Duration,
  pub ack_timeout: Duration,
  /// Cached reads refreshed after a clean sync, 0 to disable
  pub refresh_limit: usize,
}

impl CoordinatorOptions {
  pub fn from_config(config: &Config) -> Self {
    Self {
      sync_interval: Duration::from_secs(config.offline.sync_interval_secs),
      update_interval: Duration::from_secs(config.offline.update_interval_secs),
      ack_timeout: Duration::from_secs(config.offline.ack_timeout_secs),
      refresh_limit: config.offline.refresh_limit,
    }
  }
}

/// Snapshot published to the indicator layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatus {
  pub online: bool,
  pub visible: bool,
  /// A sync signal was sent and not acknowledged yet
  pub in_flight: bool,
  /// A trigger could not be acted on yet and will be retried
  pub pending_intent: bool,
  pub syncs_sent: u64,
  pub queue_depth: usize,
  pub stalled: usize,
  pub rejected: usize,
  pub last_report: Option<SyncReport>,
  pub last_synced_at: Option<DateTime<Utc>>,
  pub last_error: Option<String>,
  pub worker_version: Option<String>,
}

pub struct SyncCoordinator<T> {
  container: Arc<WorkerContainer<T>>,
  store: Option<Arc<dyn DurableStore>>,
  options: CoordinatorOptions,
  online: bool,
  visible: bool,
  in_flight: bool,
  pending_intent: bool,
  status: watch::Sender<SyncStatus>,
}

/// Owner side of a running coordinator. Dropping it without `shutdown` leaves
/// the task to stop once the signal sender is gone.
pub struct CoordinatorHandle {
  signals: mpsc::UnboundedSender<LifecycleSignal>,
  status: watch::Receiver<SyncStatus>,
  shutdown: watch::Sender<bool>,
  task: JoinHandle<()>,
}

impl CoordinatorHandle {
  /// Returns false once the coordinator has stopped.
  pub fn signal(&self, signal: LifecycleSignal) -> bool {
    self.signals.send(signal).is_ok()
  }

  pub fn signals(&self) -> mpsc::UnboundedSender<LifecycleSignal> {
    self.signals.clone()
  }

  pub fn status(&self) -> watch::Receiver<SyncStatus> {
    self.status.clone()
  }

  /// Stop the loop, releasing both timers, and wait for it.
  pub async fn shutdown(self) {
    let _ = self.shutdown.send(true);
    if let Err(e) = self.task.await {
      tracing::warn!(error = %e, "sync coordinator ended abnormally");
    }
  }
}

type SyncOutcome = Result<SyncReport, String>;

impl<T: Transport> SyncCoordinator<T> {
  pub fn new(
    container: Arc<WorkerContainer<T>>,
    store: Option<Arc<dyn DurableStore>>,
    options: CoordinatorOptions,
    online: bool,
    visible: bool,
  ) -> Self {
    let (status, _) = watch::channel(SyncStatus {
      online,
      visible,
      ..SyncStatus::default()
    });

    let coordinator = Self {
      container,
      store,
      options,
      online,
      visible,
      in_flight: false,
      pending_intent: false,
      status,
    };
    coordinator.refresh_counts();
    coordinator
  }

  pub fn spawn(self) -> CoordinatorHandle {
    let (signals_tx, signals_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let status = self.status.subscribe();

    let task = tokio::spawn(self.run(signals_rx, shutdown_rx));

    CoordinatorHandle {
      signals: signals_tx,
      status,
      shutdown: shutdown_tx,
      task,
    }
  }

  async fn run(
    mut self,
    mut signals: mpsc::UnboundedReceiver<LifecycleSignal>,
    mut shutdown: watch::Receiver<bool>,
  ) {
    let start = Instant::now();
    let mut sync_timer = timer(start, self.options.sync_interval);
    let mut update_timer = timer(start, self.options.update_interval);

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<SyncOutcome>();
    let mut in_flight_task: Option<JoinHandle<()>> = None;
    let (update_tx, mut update_rx) = mpsc::unbounded_channel::<Option<String>>();
    let mut update_task: Option<JoinHandle<()>> = None;

    loop {
      tokio::select! {
        _ = shutdown.changed() => break,
        signal = signals.recv() => {
          let Some(signal) = signal else { break };
          tracing::debug!(?signal, "lifecycle signal");
          if self.apply(signal) {
            in_flight_task = self.trigger(&done_tx).or(in_flight_task);
          }
          self.publish();
        }
        _ = sync_timer.tick() => {
          if self.online {
            tracing::debug!("periodic sync");
            in_flight_task = self.trigger(&done_tx).or(in_flight_task);
            self.publish();
          }
        }
        _ = update_timer.tick() => {
          if update_task.as_ref().map_or(true, |t| t.is_finished()) {
            update_task = Some(self.check_for_update(&update_tx));
          }
        }
        Some(version) = update_rx.recv() => {
          self.status.send_modify(|s| s.worker_version = version);
        }
        Some(outcome) = done_rx.recv() => {
          in_flight_task = None;
          if self.finish(outcome) {
            in_flight_task = self.trigger(&done_tx);
            self.publish();
          }
        }
      }
    }

    for task in [in_flight_task.take(), update_task.take()].into_iter().flatten() {
      task.abort();
    }
    tracing::debug!("sync coordinator stopped");
  }

  /// Update local state; returns whether this signal should trigger a sync.
  fn apply(&mut self, signal: LifecycleSignal) -> bool {
    let edge = match signal {
      LifecycleSignal::Visibility(v) => {
        let was_visible = self.visible;
        self.visible = v == Visibility::Visible;
        self.visible && !was_visible && self.online
      }
      LifecycleSignal::Connectivity(c) => {
        let was_online = self.online;
        self.online = c == Connectivity::Online;
        self.online && !was_online && self.visible
      }
      LifecycleSignal::SyncRequested => true,
    };

    // A retained intent fires on the next eligible event
    edge || (self.pending_intent && self.online && self.visible)
  }

  /// Send one sync signal to the worker. Returns the task awaiting its reply.
  fn trigger(&mut self, done: &mpsc::UnboundedSender<SyncOutcome>) -> Option<JoinHandle<()>> {
    if self.in_flight {
      self.pending_intent = true;
      return None;
    }

    let delivered = self
      .container
      .controller()
      .ok_or_else(|| OfflineError::SyncDeliveryFailed("no active worker".to_string()))
      .and_then(|controller| {
        let (correlation_id, reply) = controller.post(MessageKind::SyncQueue, None)?;
        Ok((controller, correlation_id, reply))
      });

    let (controller, correlation_id, reply) = match delivered {
      Ok(delivered) => delivered,
      Err(e) => {
        tracing::debug!(error = %e, "sync intent retained");
        self.pending_intent = true;
        return None;
      }
    };

    tracing::debug!(%correlation_id, "sync signal sent");
    self.in_flight = true;
    self.pending_intent = false;
    self.status.send_modify(|s| s.syncs_sent += 1);

    let options = self.options.clone();
    let done = done.clone();
    Some(tokio::spawn(async move {
      let outcome = await_ack(reply, options.ack_timeout).await;
      if let Ok(report) = &outcome {
        if report.failed == 0 && options.refresh_limit > 0 {
          refresh_cache(&controller, options.refresh_limit, options.ack_timeout).await;
        }
      }
      let _ = done.send(outcome);
    }))
  }

  /// Script update checks run beside the loop so a slow fetch never holds up
  /// signals or shutdown.
  fn check_for_update(&self, versions: &mpsc::UnboundedSender<Option<String>>) -> JoinHandle<()> {
    let container = self.container.clone();
    let versions = versions.clone();
    tokio::spawn(async move {
      if let Some(found) = container.update().await {
        tracing::debug!(found, "worker update check");
      }
      let _ = versions.send(container.version());
    })
  }

  /// Record a sync result; returns whether a coalesced trigger should go out now.
  fn finish(&mut self, outcome: SyncOutcome) -> bool {
    self.in_flight = false;
    let coalesced = self.pending_intent;
    let counts = self.queue_counts();

    let retrigger = match outcome {
      Ok(report) => {
        self.status.send_modify(|s| {
          s.last_report = Some(report);
          s.last_synced_at = Some(Utc::now());
          s.last_error = None;
          if let Some((depth, stalled, rejected)) = counts {
            s.queue_depth = depth;
            s.stalled = stalled;
            s.rejected = rejected;
          }
        });
        coalesced && self.online
      }
      Err(reason) => {
        // Retried on the next event rather than right away
        tracing::debug!(reason = %reason, "sync not acknowledged");
        self.pending_intent = true;
        self.status.send_modify(|s| s.last_error = Some(reason));
        false
      }
    };

    self.publish();
    retrigger
  }

  fn publish(&self) {
    let (online, visible, in_flight, pending_intent) =
      (self.online, self.visible, self.in_flight, self.pending_intent);
    self.status.send_if_modified(|s| {
      let changed = s.online != online
        || s.visible != visible
        || s.in_flight != in_flight
        || s.pending_intent != pending_intent;
      s.online = online;
      s.visible = visible;
      s.in_flight = in_flight;
      s.pending_intent = pending_intent;
      changed
    });
  }

  fn refresh_counts(&self) {
    if let Some((depth, stalled, rejected)) = self.queue_counts() {
      self.status.send_modify(|s| {
        s.queue_depth = depth;
        s.stalled = stalled;
        s.rejected = rejected;
      });
    }
  }

  /// Queue depth, stalled and rejected counts.
  fn queue_counts(&self) -> Option<(usize, usize, usize)> {
    let store = self.store.as_ref()?;

    let counts = store.count(Collection::Mutations).and_then(|depth| {
      let mut stalled = 0;
      let mut rejected = 0;
      for m in store.get_all::<PendingMutation>()?.decoded() {
        match m.status {
          MutationStatus::Stalled => stalled += 1,
          MutationStatus::Rejected => rejected += 1,
          MutationStatus::Pending => {}
        }
      }
      Ok((depth, stalled, rejected))
    });

    match counts {
      Ok(counts) => Some(counts),
      Err(e) => {
        tracing::warn!(error = %e, "could not read queue counts");
        None
      }
    }
  }
}

/// First tick one period after `start`, not immediately.
fn timer(start: Instant, period: Duration) -> Interval {
  let period = period.max(Duration::from_millis(1));
  let mut timer = interval_at(start + period, period);
  timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
  timer
}

async fn await_ack(reply: oneshot::Receiver<WorkerReply>, ack_timeout: Duration) -> SyncOutcome {
  match tokio::time::timeout(ack_timeout, reply).await {
    Err(_) => Err("no acknowledgment from worker".to_string()),
    Ok(Err(_)) => Err("worker dropped the sync signal".to_string()),
    Ok(Ok(reply)) => match reply.outcome {
      ReplyOutcome::Synced(report) => Ok(report),
      ReplyOutcome::Failed(reason) => Err(reason),
      other => Err(format!(
        "unexpected reply to {}: {:?}",
        reply.correlation_id, other
      )),
    },
  }
}

async fn refresh_cache(controller: &WorkerController, limit: usize, ack_timeout: Duration) {
  let payload = serde_json::json!({ "limit": limit });
  let (correlation_id, reply): (Uuid, _) = match controller.post(MessageKind::RefreshCache, Some(payload)) {
    Ok(posted) => posted,
    Err(e) => {
      tracing::debug!(error = %e, "cache refresh not sent");
      return;
    }
  };

  match tokio::time::timeout(ack_timeout, reply).await {
    Ok(Ok(WorkerReply {
      outcome: ReplyOutcome::Refreshed(count),
      ..
    })) => tracing::debug!(%correlation_id, count, "cached reads refreshed"),
    other => tracing::debug!(%correlation_id, ?other, "cache refresh incomplete"),
  }
}
