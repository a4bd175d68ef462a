//! Typed envelopes exchanged with the worker.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::OfflineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
  /// Drain the mutation queue
  SyncQueue,
  /// Re-fetch the most recent cached reads. Payload: `{"limit": n}`
  RefreshCache,
  Ping,
}

pub struct WorkerEnvelope {
  pub kind: MessageKind,
  pub payload: Option<Value>,
  pub correlation_id: Uuid,
  pub reply: oneshot::Sender<WorkerReply>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReply {
  pub correlation_id: Uuid,
  pub outcome: ReplyOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
  Synced(SyncReport),
  Refreshed(usize),
  Pong { version: Option<String> },
  Failed(String),
}

/// What one drain of the queue did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
  /// Delivered and removed from the queue
  pub replayed: usize,
  /// Attempted and failed, still queued
  pub failed: usize,
  /// Not attempted (backoff, or the drain stopped on a connectivity failure)
  pub deferred: usize,
  /// Queue depth after the drain
  pub remaining: usize,
  pub stalled: usize,
  pub rejected: usize,
}

/// Sending half of the worker's mailbox.
#[derive(Clone, Debug)]
pub struct WorkerController {
  tx: mpsc::Sender<WorkerEnvelope>,
}

impl WorkerController {
  pub(crate) fn new(tx: mpsc::Sender<WorkerEnvelope>) -> Self {
    Self { tx }
  }

  /// Post a message; the reply arrives on the returned receiver.
  ///
  /// Never waits: a full or closed mailbox is a `SyncDeliveryFailed`.
  pub fn post(
    &self,
    kind: MessageKind,
    payload: Option<Value>,
  ) -> Result<(Uuid, oneshot::Receiver<WorkerReply>), OfflineError> {
    let correlation_id = Uuid::new_v4();
    let (reply, rx) = oneshot::channel();
    let envelope = WorkerEnvelope {
      kind,
      payload,
      correlation_id,
      reply,
    };

    self.tx.try_send(envelope).map_err(|e| {
      let reason = match e {
        mpsc::error::TrySendError::Full(_) => "worker mailbox full",
        mpsc::error::TrySendError::Closed(_) => "worker stopped",
      };
      OfflineError::SyncDeliveryFailed(reason.to_string())
    })?;

    Ok((correlation_id, rx))
  }

  pub fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_kind_wire_name() {
    assert_eq!(
      serde_json::to_string(&MessageKind::SyncQueue).unwrap(),
      "\"SYNC_QUEUE\""
    );
  }

  #[test]
  fn test_post_to_stopped_worker_fails_delivery() {
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let controller = WorkerController::new(tx);
    let err = controller.post(MessageKind::SyncQueue, None).unwrap_err();
    assert!(matches!(err, OfflineError::SyncDeliveryFailed(_)));
  }

  #[test]
  fn test_post_to_full_mailbox_fails_delivery() {
    let (tx, _rx) = mpsc::channel(1);
    let controller = WorkerController::new(tx);
    controller.post(MessageKind::Ping, None).unwrap();
    let err = controller.post(MessageKind::SyncQueue, None).unwrap_err();
    assert_eq!(err.to_string(), "sync signal could not be delivered: worker mailbox full");
  }

  #[test]
  fn test_envelope_carries_correlation_id() {
    let (tx, mut rx) = mpsc::channel(4);
    let controller = WorkerController::new(tx);
    let (id, _reply) = controller
      .post(MessageKind::RefreshCache, Some(serde_json::json!({"limit": 3})))
      .unwrap();
    let envelope = rx.try_recv().unwrap();
    assert_eq!(envelope.correlation_id, id);
    assert_eq!(envelope.kind, MessageKind::RefreshCache);
  }
}
