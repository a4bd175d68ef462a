//! Error taxonomy for the offline layer.
//!
//! Everything in here is caught at the provider/coordinator boundary and turned
//! into "act as if online, no offline cache". Only the binary surfaces these to
//! the user, through `color_eyre`.

use thiserror::Error;
use uuid::Uuid;

use crate::api::TransportError;

#[derive(Debug, Error)]
pub enum OfflineError {
  /// The persistent store could not be opened or migrated.
  #[error("persistent storage unavailable: {0}")]
  StorageUnavailable(String),

  /// Capability absent or the registration options were rejected.
  #[error("worker registration failed: {0}")]
  WorkerRegistrationFailed(String),

  /// No active worker controller to receive a sync signal.
  #[error("sync signal could not be delivered: {0}")]
  SyncDeliveryFailed(String),

  /// The worker received the sync signal but could not drain the queue.
  #[error("queue drain failed: {0}")]
  DrainFailed(String),

  /// A queued write failed again on replay. The mutation stays queued.
  #[error("replay of mutation {id} failed: {source}")]
  ReplayFailed {
    id: Uuid,
    #[source]
    source: TransportError,
  },

  /// Network unreachable and nothing cached for the request.
  #[error("offline and no cached response for {0}")]
  Offline(String),

  #[error(transparent)]
  Transport(#[from] TransportError),

  /// A store operation failed after a successful init.
  #[error("storage error: {0}")]
  Storage(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for OfflineError {
  fn from(e: rusqlite::Error) -> Self {
    OfflineError::Storage(e.to_string())
  }
}
