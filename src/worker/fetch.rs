//! Request interception: network first, cache and queue as fallbacks.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::api::{ApiRequest, Method, Transport, TransportError};
use crate::error::OfflineError;
use crate::store::{fingerprint, CacheEntry, CachePolicy, DurableStore, PendingMutation, StoreExt};

const REFRESH_CONCURRENCY: usize = 4;

/// Indicates where a read came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
  /// Fresh data from network
  Network,
  /// Network unavailable, serving cached data
  Offline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
  pub value: Value,
  pub source: FetchSource,
  /// When the served copy was cached (offline reads only)
  pub stored_at: Option<DateTime<Utc>>,
}

impl Fetched {
  fn from_network(value: Value) -> Self {
    Self {
      value,
      source: FetchSource::Network,
      stored_at: None,
    }
  }

  fn offline(value: Value, stored_at: DateTime<Utc>) -> Self {
    Self {
      value,
      source: FetchSource::Offline,
      stored_at: Some(stored_at),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
  /// The server accepted the write
  Delivered(Value),
  /// The network was unreachable; the write waits in the queue under this id
  Queued(Uuid),
}

/// Sits between the application and the network.
///
/// Without a store (unsupported platform, failed registration) every call goes
/// straight to the network and failures are returned as-is.
pub struct FetchInterceptor<T> {
  transport: Arc<T>,
  store: Option<Arc<dyn DurableStore>>,
  cache_policy: CachePolicy,
  timeout: Duration,
}

impl<T: Transport> FetchInterceptor<T> {
  pub fn new(
    transport: Arc<T>,
    store: Option<Arc<dyn DurableStore>>,
    cache_policy: CachePolicy,
    timeout: Duration,
  ) -> Self {
    Self {
      transport,
      store,
      cache_policy,
      timeout,
    }
  }

  pub fn is_offline_capable(&self) -> bool {
    self.store.is_some()
  }

  #[cfg(test)]
  pub fn store(&self) -> Option<&Arc<dyn DurableStore>> {
    self.store.as_ref()
  }

  async fn send(&self, request: &ApiRequest) -> Result<Value, TransportError> {
    match tokio::time::timeout(self.timeout, self.transport.send(request)).await {
      Ok(result) => result,
      Err(_) => Err(TransportError::Timeout),
    }
  }

  /// Read with network-first strategy.
  ///
  /// 1. Try the network; on success cache the body and return it
  /// 2. On a connectivity failure, serve the cached copy unless expired
  /// 3. Server errors are returned unchanged
  pub async fn read(&self, path: &str) -> Result<Fetched, OfflineError> {
    let request = ApiRequest::get(path);

    match self.send(&request).await {
      Ok(value) => {
        self.remember(path, &value);
        Ok(Fetched::from_network(value))
      }
      Err(e) if e.is_connectivity() => {
        let Some(store) = &self.store else {
          return Err(e.into());
        };

        match store.get::<CacheEntry>(&fingerprint(Method::Get, path)) {
          Ok(Some(entry)) if !self.cache_policy.is_expired(&entry, Utc::now()) => {
            tracing::debug!(path, stored_at = %entry.stored_at, "serving cached read");
            Ok(Fetched::offline(entry.value, entry.stored_at))
          }
          Ok(_) => Err(OfflineError::Offline(path.to_string())),
          Err(store_err) => {
            tracing::warn!(path, error = %store_err, "cache lookup failed");
            Err(OfflineError::Offline(path.to_string()))
          }
        }
      }
      Err(e) => Err(e.into()),
    }
  }

  /// Write, queueing the mutation if the network is unreachable.
  ///
  /// The first attempt already carries the idempotency key the replays will use,
  /// so a write that reached the server before the connection dropped is not
  /// applied twice.
  pub async fn write(
    &self,
    method: Method,
    path: &str,
    payload: Option<Value>,
  ) -> Result<WriteOutcome, OfflineError> {
    let id = Uuid::new_v4();
    let request = ApiRequest::write(method, path, payload.clone()).with_idempotency_key(id.to_string());

    match self.send(&request).await {
      Ok(value) => Ok(WriteOutcome::Delivered(value)),
      Err(e) if e.is_connectivity() && method.is_write() => {
        let Some(store) = &self.store else {
          return Err(e.into());
        };

        let mutation = PendingMutation::new(id, method, path, payload);
        if let Err(store_err) = store.put(&mutation) {
          tracing::warn!(path, error = %store_err, "could not queue write");
          return Err(e.into());
        }

        tracing::info!(%id, %method, path, "network unreachable, write queued");
        Ok(WriteOutcome::Queued(id))
      }
      Err(e) => Err(e.into()),
    }
  }

  /// Cache a successful read. Store failures only cost us the offline copy.
  fn remember(&self, path: &str, value: &Value) {
    let Some(store) = &self.store else {
      return;
    };

    let entry = CacheEntry::new(Method::Get, path, value.clone());
    if let Err(e) = store.put(&entry) {
      tracing::warn!(path, error = %e, "failed to cache read");
      return;
    }
    if let Err(e) = self.cache_policy.prune(store.as_ref(), Utc::now()) {
      tracing::warn!(error = %e, "failed to prune cache");
    }
  }

  /// Re-fetch the `limit` most recently cached reads, a few at a time.
  /// Stops at the first connectivity failure. Returns how many were refreshed.
  pub async fn refresh_cached(&self, limit: usize) -> Result<usize, OfflineError> {
    let Some(store) = &self.store else {
      return Ok(0);
    };

    let urls: Vec<String> = store
      .get_all::<CacheEntry>()?
      .decoded()
      .into_iter()
      .rev()
      .take(limit)
      .map(|entry| entry.url)
      .collect();

    let mut responses = stream::iter(urls)
      .map(move |url| async move {
        let result = self.send(&ApiRequest::get(&url)).await;
        (url, result)
      })
      .buffered(REFRESH_CONCURRENCY);

    let mut refreshed = 0;
    while let Some((url, result)) = responses.next().await {
      match result {
        Ok(value) => {
          store.put(&CacheEntry::new(Method::Get, &url, value))?;
          refreshed += 1;
        }
        Err(e) if e.is_connectivity() => break,
        Err(e) => tracing::debug!(%url, error = %e, "cache refresh skipped"),
      }
    }

    Ok(refreshed)
  }
}

impl<T> Clone for FetchInterceptor<T> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
      store: self.store.clone(),
      cache_policy: self.cache_policy,
      timeout: self.timeout,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::testing::FakeTransport;
  use crate::store::{Collection, MemoryStore, MutationStatus};
  use serde_json::json;

  fn interceptor(with_store: bool) -> (Arc<FakeTransport>, FetchInterceptor<FakeTransport>) {
    let transport = Arc::new(FakeTransport::new());
    let store: Option<Arc<dyn DurableStore>> = if with_store {
      Some(Arc::new(MemoryStore::new()))
    } else {
      None
    };
    let interceptor = FetchInterceptor::new(
      transport.clone(),
      store,
      CachePolicy::default(),
      Duration::from_secs(5),
    );
    (transport, interceptor)
  }

  #[tokio::test]
  async fn test_read_falls_back_to_cache_when_offline() {
    let (transport, interceptor) = interceptor(true);
    transport.respond("ganado", json!([{"arete": "A-17"}]));

    let online = interceptor.read("ganado").await.unwrap();
    assert_eq!(online.source, FetchSource::Network);

    transport.set_online(false);
    let offline = interceptor.read("ganado").await.unwrap();
    assert_eq!(offline.source, FetchSource::Offline);
    assert_eq!(offline.value, json!([{"arete": "A-17"}]));
    assert!(offline.stored_at.is_some());
  }

  #[tokio::test]
  async fn test_read_offline_without_cache_is_offline_error() {
    let (transport, interceptor) = interceptor(true);
    transport.set_online(false);
    let err = interceptor.read("cultivos").await.unwrap_err();
    assert!(matches!(err, OfflineError::Offline(path) if path == "cultivos"));
  }

  #[tokio::test]
  async fn test_expired_cache_is_not_served() {
    let (transport, interceptor) = interceptor(true);
    let store = interceptor.store().unwrap().clone();
    let mut stale = CacheEntry::new(Method::Get, "leche", json!({"litros": 40}));
    stale.stored_at = Utc::now() - chrono::Duration::days(2);
    store.put(&stale).unwrap();

    transport.set_online(false);
    assert!(matches!(
      interceptor.read("leche").await,
      Err(OfflineError::Offline(_))
    ));
  }

  #[tokio::test]
  async fn test_write_offline_is_queued_with_zero_attempts() {
    let (transport, interceptor) = interceptor(true);
    transport.set_online(false);

    let outcome = interceptor
      .write(Method::Post, "leche", Some(json!({"litros": 12})))
      .await
      .unwrap();
    let WriteOutcome::Queued(id) = outcome else {
      panic!("expected the write to be queued, got {:?}", outcome);
    };

    let store = interceptor.store().unwrap();
    let queued = store.get::<PendingMutation>(&id.to_string()).unwrap().unwrap();
    assert_eq!(queued.attempt_count, 0);
    assert_eq!(queued.status, MutationStatus::Pending);
    assert_eq!(queued.endpoint, "leche");
    assert_eq!(queued.payload, Some(json!({"litros": 12})));
  }

  #[tokio::test]
  async fn test_server_errors_are_not_queued() {
    let (transport, interceptor) = interceptor(true);
    transport.fail_with(Some(400));

    let err = interceptor
      .write(Method::Put, "ganado/3", Some(json!({})))
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      OfflineError::Transport(TransportError::Status { status: 400, .. })
    ));
    assert_eq!(
      interceptor
        .store()
        .unwrap()
        .count(Collection::Mutations)
        .unwrap(),
      0
    );
  }

  #[tokio::test]
  async fn test_without_store_writes_go_straight_to_network() {
    let (transport, interceptor) = interceptor(false);
    assert!(!interceptor.is_offline_capable());

    let delivered = interceptor.write(Method::Post, "ganado", None).await.unwrap();
    assert!(matches!(delivered, WriteOutcome::Delivered(_)));
    assert_eq!(transport.delivered_writes().len(), 1);

    transport.set_online(false);
    let err = interceptor.write(Method::Post, "ganado", None).await.unwrap_err();
    assert!(matches!(
      err,
      OfflineError::Transport(TransportError::Connect(_))
    ));
  }

  #[tokio::test]
  async fn test_refresh_updates_cached_reads() {
    let (transport, interceptor) = interceptor(true);
    transport.respond("reportes", json!({"version": 1}));
    interceptor.read("reportes").await.unwrap();

    transport.respond("reportes", json!({"version": 2}));
    assert_eq!(interceptor.refresh_cached(10).await.unwrap(), 1);

    transport.set_online(false);
    let cached = interceptor.read("reportes").await.unwrap();
    assert_eq!(cached.value, json!({"version": 2}));
  }
}
