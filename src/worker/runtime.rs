//! The worker task itself.

use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::fetch::FetchInterceptor;
use super::lifecycle::WorkerOptions;
use super::message::{MessageKind, ReplyOutcome, WorkerController, WorkerEnvelope, WorkerReply};
use super::replay::ReplayExecutor;
use crate::api::Transport;
use crate::store::DurableStore;

const DEFAULT_REFRESH_LIMIT: usize = 20;

struct WorkerRuntime<T> {
  executor: ReplayExecutor<T>,
  interceptor: FetchInterceptor<T>,
  version: watch::Receiver<Option<String>>,
}

/// Start a worker task. It runs until `shutdown` flips or every controller
/// is dropped.
pub(crate) fn spawn<T: Transport>(
  store: Arc<dyn DurableStore>,
  transport: Arc<T>,
  options: &WorkerOptions,
  version: watch::Receiver<Option<String>>,
  shutdown: watch::Receiver<bool>,
) -> (WorkerController, JoinHandle<()>) {
  let (tx, rx) = mpsc::channel(options.mailbox);

  let runtime = WorkerRuntime {
    executor: ReplayExecutor::new(
      store.clone(),
      transport.clone(),
      options.retry,
      options.request_timeout,
    ),
    interceptor: FetchInterceptor::new(
      transport,
      Some(store),
      options.cache_policy,
      options.request_timeout,
    ),
    version,
  };

  let handle = tokio::spawn(runtime.run(rx, shutdown));
  (WorkerController::new(tx), handle)
}

impl<T: Transport> WorkerRuntime<T> {
  async fn run(
    self,
    mut rx: mpsc::Receiver<WorkerEnvelope>,
    mut shutdown: watch::Receiver<bool>,
  ) {
    tracing::debug!("worker started");
    let mut backlog: VecDeque<WorkerEnvelope> = VecDeque::new();

    loop {
      let envelope = match backlog.pop_front() {
        Some(envelope) => envelope,
        None => tokio::select! {
          _ = shutdown.changed() => break,
          msg = rx.recv() => match msg {
            Some(envelope) => envelope,
            None => break,
          },
        },
      };

      tokio::select! {
        _ = shutdown.changed() => break,
        _ = self.handle(envelope, &mut rx, &mut backlog) => {}
      }
    }

    tracing::debug!("worker stopped");
  }

  async fn handle(
    &self,
    envelope: WorkerEnvelope,
    rx: &mut mpsc::Receiver<WorkerEnvelope>,
    backlog: &mut VecDeque<WorkerEnvelope>,
  ) {
    tracing::debug!(kind = ?envelope.kind, correlation_id = %envelope.correlation_id, "worker message");

    let outcome = match envelope.kind {
      MessageKind::SyncQueue => {
        let outcome = match self.executor.drain(Utc::now()).await {
          Ok(report) => ReplyOutcome::Synced(report),
          Err(e) => {
            tracing::warn!(error = %e, "queue drain failed");
            ReplyOutcome::Failed(e.to_string())
          }
        };

        // Sync signals that piled up during the drain share its result
        while let Ok(next) = rx.try_recv() {
          if next.kind == MessageKind::SyncQueue {
            reply(next, outcome.clone());
          } else {
            backlog.push_back(next);
          }
        }
        outcome
      }
      MessageKind::RefreshCache => {
        let limit = envelope
          .payload
          .as_ref()
          .and_then(|p| p.get("limit"))
          .and_then(|l| l.as_u64())
          .map(|l| l as usize)
          .unwrap_or(DEFAULT_REFRESH_LIMIT);

        match self.interceptor.refresh_cached(limit).await {
          Ok(count) => ReplyOutcome::Refreshed(count),
          Err(e) => ReplyOutcome::Failed(e.to_string()),
        }
      }
      MessageKind::Ping => {
        let version = self.version.borrow().clone();
        ReplyOutcome::Pong { version }
      }
    };

    reply(envelope, outcome);
  }
}

fn reply(envelope: WorkerEnvelope, outcome: ReplyOutcome) {
  let correlation_id = envelope.correlation_id;
  if envelope
    .reply
    .send(WorkerReply {
      correlation_id,
      outcome,
    })
    .is_err()
  {
    tracing::debug!(%correlation_id, "reply dropped, sender stopped waiting");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::testing::FakeTransport;
  use crate::api::Method;
  use crate::store::{MemoryStore, PendingMutation, StoreExt};
  use crate::worker::SyncReport;
  use uuid::Uuid;

  fn start() -> (
    Arc<dyn DurableStore>,
    Arc<FakeTransport>,
    WorkerController,
    watch::Sender<bool>,
    JoinHandle<()>,
  ) {
    let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
    let transport = Arc::new(FakeTransport::new());
    let (_version_tx, version_rx) = watch::channel(Some("abc".to_string()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (controller, handle) = spawn(
      store.clone(),
      transport.clone(),
      &WorkerOptions::default(),
      version_rx,
      shutdown_rx,
    );
    (store, transport, controller, shutdown_tx, handle)
  }

  #[tokio::test]
  async fn test_sync_queue_replies_with_report() {
    let (store, _transport, controller, _shutdown, _handle) = start();
    store
      .put(&PendingMutation::new(Uuid::new_v4(), Method::Post, "ganado", None))
      .unwrap();

    let (id, reply) = controller.post(MessageKind::SyncQueue, None).unwrap();
    let reply = reply.await.unwrap();
    assert_eq!(reply.correlation_id, id);
    assert_eq!(
      reply.outcome,
      ReplyOutcome::Synced(SyncReport {
        replayed: 1,
        ..SyncReport::default()
      })
    );
  }

  #[tokio::test]
  async fn test_overlapping_sync_signals_replay_once() {
    let (store, transport, controller, _shutdown, _handle) = start();
    store
      .put(&PendingMutation::new(Uuid::new_v4(), Method::Post, "leche", None))
      .unwrap();

    let (_, first) = controller.post(MessageKind::SyncQueue, None).unwrap();
    let (_, second) = controller.post(MessageKind::SyncQueue, None).unwrap();
    first.await.unwrap();
    second.await.unwrap();

    assert_eq!(transport.delivered_writes().len(), 1);
  }

  #[tokio::test]
  async fn test_ping_reports_version() {
    let (_store, _transport, controller, _shutdown, _handle) = start();
    let (_, reply) = controller.post(MessageKind::Ping, None).unwrap();
    assert_eq!(
      reply.await.unwrap().outcome,
      ReplyOutcome::Pong {
        version: Some("abc".to_string())
      }
    );
  }

  #[tokio::test]
  async fn test_shutdown_stops_the_task() {
    let (_store, _transport, controller, shutdown, handle) = start();
    shutdown.send(true).unwrap();
    handle.await.unwrap();
    assert!(controller.is_closed());
  }
}
