//! Periodic reachability probe standing in for the platform's online flag.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{Connectivity, LifecycleSignal};
use crate::api::{ApiRequest, Transport};

pub struct ConnectivityMonitor<T> {
  transport: Arc<T>,
  health_path: String,
  interval: Duration,
  timeout: Duration,
}

pub struct MonitorHandle {
  shutdown: watch::Sender<bool>,
  task: JoinHandle<()>,
}

impl MonitorHandle {
  pub async fn shutdown(self) {
    let _ = self.shutdown.send(true);
    if let Err(e) = self.task.await {
      tracing::warn!(error = %e, "connectivity monitor ended abnormally");
    }
  }
}

impl<T: Transport> ConnectivityMonitor<T> {
  pub fn new(transport: Arc<T>, health_path: &str, interval: Duration, timeout: Duration) -> Self {
    Self {
      transport,
      health_path: health_path.to_string(),
      interval,
      timeout,
    }
  }

  /// Any answer from the server counts as online, even an error status.
  pub async fn probe(&self) -> Connectivity {
    let request = ApiRequest::get(&self.health_path);
    match tokio::time::timeout(self.timeout, self.transport.send(&request)).await {
      Ok(Ok(_)) => Connectivity::Online,
      Ok(Err(e)) if !e.is_connectivity() => Connectivity::Online,
      _ => Connectivity::Offline,
    }
  }

  /// Probe on an interval and report transitions. The first probe result is
  /// always reported.
  pub fn spawn(self, signals: mpsc::UnboundedSender<LifecycleSignal>) -> MonitorHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      let mut last: Option<Connectivity> = None;

      loop {
        tokio::select! {
          _ = shutdown_rx.changed() => break,
          _ = ticker.tick() => {
            let current = self.probe().await;
            if last != Some(current) {
              tracing::info!(?current, "connectivity changed");
              last = Some(current);
              if signals.send(LifecycleSignal::Connectivity(current)).is_err() {
                break;
              }
            }
          }
        }
      }
    });

    MonitorHandle {
      shutdown: shutdown_tx,
      task,
    }
  }
}
