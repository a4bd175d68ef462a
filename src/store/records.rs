//! The two record kinds the offline layer persists.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::traits::{Collection, Record};
use crate::api::{ApiRequest, Method};

/// Fixed-width timestamp so sort keys order lexically.
fn sortable(ts: &DateTime<Utc>) -> String {
  ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
  /// Waiting for the next sync
  Pending,
  /// Past the retry threshold; still retried, shown to the user
  Stalled,
  /// The server refused it; kept until the user discards it
  Rejected,
}

impl MutationStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      MutationStatus::Pending => "pending",
      MutationStatus::Stalled => "stalled",
      MutationStatus::Rejected => "rejected",
    }
  }
}

/// A write that could not reach the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
  /// Doubles as the idempotency key on every delivery attempt
  pub id: Uuid,
  pub endpoint: String,
  pub method: Method,
  pub payload: Option<Value>,
  pub created_at: DateTime<Utc>,
  pub attempt_count: u32,
  pub next_attempt_at: DateTime<Utc>,
  pub last_error: Option<String>,
  pub status: MutationStatus,
}

impl PendingMutation {
  pub fn new(id: Uuid, method: Method, endpoint: &str, payload: Option<Value>) -> Self {
    let now = Utc::now();
    Self {
      id,
      endpoint: endpoint.to_string(),
      method,
      payload,
      created_at: now,
      attempt_count: 0,
      next_attempt_at: now,
      last_error: None,
      status: MutationStatus::Pending,
    }
  }

  /// The request a replay sends.
  pub fn to_request(&self) -> ApiRequest {
    ApiRequest::write(self.method, &self.endpoint, self.payload.clone())
      .with_idempotency_key(self.id.to_string())
  }

  pub fn is_due(&self, now: DateTime<Utc>) -> bool {
    self.status != MutationStatus::Rejected && self.next_attempt_at <= now
  }
}

impl Record for PendingMutation {
  const COLLECTION: Collection = Collection::Mutations;

  fn record_id(&self) -> String {
    self.id.to_string()
  }

  fn sort_key(&self) -> String {
    format!("{}:{}", sortable(&self.created_at), self.id)
  }
}

/// Request fingerprint used as the cache key: sha256 of "METHOD URL".
pub fn fingerprint(method: Method, url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(method.as_str().as_bytes());
  hasher.update(b" ");
  hasher.update(url.trim_start_matches('/').as_bytes());
  hex::encode(hasher.finalize())
}

/// A successful read, served back when the network is gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub key: String,
  pub method: Method,
  pub url: String,
  pub value: Value,
  pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
  pub fn new(method: Method, url: &str, value: Value) -> Self {
    Self {
      key: fingerprint(method, url),
      method,
      url: url.to_string(),
      value,
      stored_at: Utc::now(),
    }
  }
}

impl Record for CacheEntry {
  const COLLECTION: Collection = Collection::Cache;

  fn record_id(&self) -> String {
    self.key.clone()
  }

  fn sort_key(&self) -> String {
    sortable(&self.stored_at)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;
  use serde_json::json;

  #[test]
  fn test_new_mutation_is_due_immediately() {
    let m = PendingMutation::new(Uuid::new_v4(), Method::Post, "ganado", Some(json!({"arete": "A-17"})));
    assert_eq!(m.attempt_count, 0);
    assert_eq!(m.status, MutationStatus::Pending);
    assert!(m.is_due(Utc::now()));
  }

  #[test]
  fn test_rejected_mutation_is_never_due() {
    let mut m = PendingMutation::new(Uuid::new_v4(), Method::Delete, "cultivos/4", None);
    m.status = MutationStatus::Rejected;
    assert!(!m.is_due(Utc::now() + Duration::days(1)));
  }

  #[test]
  fn test_replay_request_carries_idempotency_key() {
    let m = PendingMutation::new(Uuid::new_v4(), Method::Put, "leche/9", Some(json!({"litros": 12})));
    let request = m.to_request();
    assert_eq!(request.method, Method::Put);
    assert_eq!(request.path, "leche/9");
    assert_eq!(request.idempotency_key, Some(m.id.to_string()));
  }

  #[test]
  fn test_sort_keys_follow_creation_order() {
    let mut first = PendingMutation::new(Uuid::new_v4(), Method::Post, "ganado", None);
    let mut second = PendingMutation::new(Uuid::new_v4(), Method::Post, "ganado", None);
    first.created_at = Utc::now() - Duration::seconds(90);
    second.created_at = Utc::now();
    assert!(first.sort_key() < second.sort_key());
  }

  #[test]
  fn test_fingerprint_ignores_leading_slash() {
    assert_eq!(
      fingerprint(Method::Get, "/reportes/mensual"),
      fingerprint(Method::Get, "reportes/mensual")
    );
    assert_ne!(
      fingerprint(Method::Get, "reportes/mensual"),
      fingerprint(Method::Get, "reportes/anual")
    );
    assert_eq!(fingerprint(Method::Get, "ganado").len(), 64);
  }
}
