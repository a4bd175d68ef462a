//! Store trait with SQLite and in-memory implementations.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

use super::traits::{Collection, RawRecord, Record, Records};
use crate::error::OfflineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
  Sqlite,
  /// Fallback when the platform denies persistent storage
  Memory,
}

impl StoreKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      StoreKind::Sqlite => "sqlite",
      StoreKind::Memory => "memory",
    }
  }
}

/// Trait for store backends. Object safe so it can be shared as
/// `Arc<dyn DurableStore>`; typed access lives in [`StoreExt`].
pub trait DurableStore: Send + Sync {
  /// Insert or replace. Last write wins.
  fn put_raw(&self, collection: Collection, record: RawRecord) -> Result<(), OfflineError>;

  fn get_raw(&self, collection: Collection, id: &str) -> Result<Option<RawRecord>, OfflineError>;

  /// All rows of a collection ordered by sort key.
  fn get_all_raw(&self, collection: Collection) -> Result<Vec<RawRecord>, OfflineError>;

  /// Remove a record. Missing ids are a no-op.
  fn delete(&self, collection: Collection, id: &str) -> Result<(), OfflineError>;

  fn count(&self, collection: Collection) -> Result<usize, OfflineError>;

  fn kind(&self) -> StoreKind;
}

/// Typed helpers over any [`DurableStore`].
pub trait StoreExt {
  fn put<R: Record>(&self, record: &R) -> Result<(), OfflineError>;

  fn get<R: Record>(&self, id: &str) -> Result<Option<R>, OfflineError>;

  fn get_all<R: Record>(&self) -> Result<Records<R>, OfflineError>;
}

impl<S: DurableStore + ?Sized> StoreExt for S {
  fn put<R: Record>(&self, record: &R) -> Result<(), OfflineError> {
    self.put_raw(R::COLLECTION, RawRecord::encode(record)?)
  }

  fn get<R: Record>(&self, id: &str) -> Result<Option<R>, OfflineError> {
    self
      .get_raw(R::COLLECTION, id)?
      .map(|raw| raw.decode::<R>())
      .transpose()
  }

  fn get_all<R: Record>(&self) -> Result<Records<R>, OfflineError> {
    Ok(Records::new(self.get_all_raw(R::COLLECTION)?))
  }
}

/// In-memory store. Same semantics as SQLite, gone on exit.
#[derive(Default)]
pub struct MemoryStore {
  collections: Mutex<HashMap<Collection, BTreeMap<String, RawRecord>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(
    &self,
  ) -> Result<std::sync::MutexGuard<'_, HashMap<Collection, BTreeMap<String, RawRecord>>>, OfflineError>
  {
    self
      .collections
      .lock()
      .map_err(|e| OfflineError::Storage(format!("Lock poisoned: {}", e)))
  }
}

impl DurableStore for MemoryStore {
  fn put_raw(&self, collection: Collection, record: RawRecord) -> Result<(), OfflineError> {
    self
      .lock()?
      .entry(collection)
      .or_default()
      .insert(record.id.clone(), record);
    Ok(())
  }

  fn get_raw(&self, collection: Collection, id: &str) -> Result<Option<RawRecord>, OfflineError> {
    Ok(
      self
        .lock()?
        .get(&collection)
        .and_then(|c| c.get(id))
        .cloned(),
    )
  }

  fn get_all_raw(&self, collection: Collection) -> Result<Vec<RawRecord>, OfflineError> {
    let mut rows: Vec<RawRecord> = self
      .lock()?
      .get(&collection)
      .map(|c| c.values().cloned().collect())
      .unwrap_or_default();
    rows.sort_by(|a, b| a.sort_key.cmp(&b.sort_key).then_with(|| a.id.cmp(&b.id)));
    Ok(rows)
  }

  fn delete(&self, collection: Collection, id: &str) -> Result<(), OfflineError> {
    if let Some(c) = self.lock()?.get_mut(&collection) {
      c.remove(id);
    }
    Ok(())
  }

  fn count(&self, collection: Collection) -> Result<usize, OfflineError> {
    Ok(self.lock()?.get(&collection).map(|c| c.len()).unwrap_or(0))
  }

  fn kind(&self) -> StoreKind {
    StoreKind::Memory
  }
}

/// SQLite-based store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

/// Schema for the record table.
const STORE_SCHEMA: &str = r#"
-- One table, partitioned by collection (stores serialized JSON)
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    sort_key TEXT NOT NULL,
    data BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_records_sort
    ON records(collection, sort_key);
"#;

impl SqliteStore {
  /// Open or create the store at `path`.
  ///
  /// Any failure (directory, open, migration) is `StorageUnavailable`; the caller
  /// decides whether to fall back to memory.
  pub fn init(path: &Path) -> Result<Self, OfflineError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        OfflineError::StorageUnavailable(format!("Failed to create store directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      OfflineError::StorageUnavailable(format!(
        "Failed to open store at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn)
  }

  /// Store backed by a private in-memory SQLite database.
  #[cfg(test)]
  pub fn in_memory() -> Result<Self, OfflineError> {
    let conn = Connection::open_in_memory()
      .map_err(|e| OfflineError::StorageUnavailable(e.to_string()))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self, OfflineError> {
    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| OfflineError::StorageUnavailable(format!("Failed to run migrations: {}", e)))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, OfflineError> {
    self
      .conn
      .lock()
      .map_err(|e| OfflineError::Storage(format!("Lock poisoned: {}", e)))
  }
}

impl DurableStore for SqliteStore {
  fn put_raw(&self, collection: Collection, record: RawRecord) -> Result<(), OfflineError> {
    self.conn()?.execute(
      "INSERT OR REPLACE INTO records (collection, id, sort_key, data, updated_at)
       VALUES (?, ?, ?, ?, datetime('now'))",
      params![collection.as_str(), record.id, record.sort_key, record.data],
    )?;
    Ok(())
  }

  fn get_raw(&self, collection: Collection, id: &str) -> Result<Option<RawRecord>, OfflineError> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(
      "SELECT id, sort_key, data FROM records
       WHERE collection = ? AND id = ?",
    )?;

    let row = stmt
      .query_row(params![collection.as_str(), id], |row| {
        Ok(RawRecord {
          id: row.get(0)?,
          sort_key: row.get(1)?,
          data: row.get(2)?,
        })
      })
      .optional()?;

    Ok(row)
  }

  fn get_all_raw(&self, collection: Collection) -> Result<Vec<RawRecord>, OfflineError> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(
      "SELECT id, sort_key, data FROM records
       WHERE collection = ?
       ORDER BY sort_key, id",
    )?;

    let rows = stmt
      .query_map(params![collection.as_str()], |row| {
        Ok(RawRecord {
          id: row.get(0)?,
          sort_key: row.get(1)?,
          data: row.get(2)?,
        })
      })?
      .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
  }

  fn delete(&self, collection: Collection, id: &str) -> Result<(), OfflineError> {
    self.conn()?.execute(
      "DELETE FROM records WHERE collection = ? AND id = ?",
      params![collection.as_str(), id],
    )?;
    Ok(())
  }

  fn count(&self, collection: Collection) -> Result<usize, OfflineError> {
    let count: i64 = self.conn()?.query_row(
      "SELECT COUNT(*) FROM records WHERE collection = ?",
      params![collection.as_str()],
      |row| row.get(0),
    )?;
    Ok(count as usize)
  }

  fn kind(&self) -> StoreKind {
    StoreKind::Sqlite
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::Method;
  use crate::store::{CacheEntry, PendingMutation};
  use serde_json::json;
  use tempfile::TempDir;
  use uuid::Uuid;

  fn sqlite_store() -> (SqliteStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = SqliteStore::init(&temp_dir.path().join("nested").join("offline.db")).unwrap();
    (store, temp_dir)
  }

  fn mutation(endpoint: &str) -> PendingMutation {
    PendingMutation::new(Uuid::new_v4(), Method::Post, endpoint, Some(json!({"n": 1})))
  }

  /// Interleaved puts and deletes always read back the latest value.
  fn check_read_your_writes(store: &dyn DurableStore) {
    let mut a = mutation("ganado");
    let b = mutation("cultivos");
    let id = a.id.to_string();

    store.put(&a).unwrap();
    assert_eq!(store.get::<PendingMutation>(&id).unwrap(), Some(a.clone()));

    a.attempt_count = 3;
    store.put(&a).unwrap();
    store.put(&b).unwrap();
    assert_eq!(
      store.get::<PendingMutation>(&id).unwrap().unwrap().attempt_count,
      3
    );

    store.delete(Collection::Mutations, &id).unwrap();
    assert_eq!(store.get::<PendingMutation>(&id).unwrap(), None);

    a.attempt_count = 4;
    store.put(&a).unwrap();
    assert_eq!(
      store.get::<PendingMutation>(&id).unwrap().unwrap().attempt_count,
      4
    );
    assert_eq!(store.count(Collection::Mutations).unwrap(), 2);
  }

  #[test]
  fn test_sqlite_read_your_writes() {
    let (store, _dir) = sqlite_store();
    check_read_your_writes(&store);
  }

  #[test]
  fn test_sqlite_in_memory_read_your_writes() {
    let store = SqliteStore::in_memory().unwrap();
    assert_eq!(store.kind(), StoreKind::Sqlite);
    check_read_your_writes(&store);
  }

  #[test]
  fn test_memory_read_your_writes() {
    check_read_your_writes(&MemoryStore::new());
  }

  #[test]
  fn test_duplicate_put_is_upsert() {
    let (store, _dir) = sqlite_store();
    let m = mutation("leche");
    store.put(&m).unwrap();
    store.put(&m).unwrap();
    assert_eq!(store.count(Collection::Mutations).unwrap(), 1);
  }

  #[test]
  fn test_delete_missing_is_noop() {
    let (store, _dir) = sqlite_store();
    store.delete(Collection::Mutations, "does-not-exist").unwrap();
    MemoryStore::new()
      .delete(Collection::Cache, "does-not-exist")
      .unwrap();
  }

  #[test]
  fn test_get_all_is_ordered_and_restartable() {
    let (store, _dir) = sqlite_store();
    let mut older = mutation("ganado");
    older.created_at = older.created_at - chrono::Duration::minutes(5);
    let newer = mutation("cultivos");
    store.put(&newer).unwrap();
    store.put(&older).unwrap();

    let records = store.get_all::<PendingMutation>().unwrap();
    let first_pass: Vec<String> = records.iter().map(|r| r.unwrap().endpoint).collect();
    let second_pass: Vec<String> = records.iter().map(|r| r.unwrap().endpoint).collect();
    assert_eq!(first_pass, vec!["ganado", "cultivos"]);
    assert_eq!(first_pass, second_pass);
  }

  #[test]
  fn test_collections_are_separate() {
    let store = MemoryStore::new();
    store.put(&mutation("ganado")).unwrap();
    store
      .put(&CacheEntry::new(Method::Get, "ganado", json!([])))
      .unwrap();
    assert_eq!(store.count(Collection::Mutations).unwrap(), 1);
    assert_eq!(store.count(Collection::Cache).unwrap(), 1);
    assert_eq!(store.get_all::<CacheEntry>().unwrap().len(), 1);
  }

  #[test]
  fn test_undecodable_rows_are_skipped() {
    let store = MemoryStore::new();
    store
      .put_raw(
        Collection::Mutations,
        RawRecord {
          id: "broken".into(),
          sort_key: "0".into(),
          data: b"not json".to_vec(),
        },
      )
      .unwrap();
    store.put(&mutation("ganado")).unwrap();

    let records = store.get_all::<PendingMutation>().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records.decoded().len(), 1);
  }

  #[test]
  fn test_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("offline.db");
    let m = mutation("finanzas");
    {
      let store = SqliteStore::init(&path).unwrap();
      store.put(&m).unwrap();
    }
    let store = SqliteStore::init(&path).unwrap();
    assert_eq!(
      store.get::<PendingMutation>(&m.id.to_string()).unwrap(),
      Some(m)
    );
  }

  #[test]
  fn test_unopenable_path_is_storage_unavailable() {
    let temp_dir = TempDir::new().unwrap();
    // A file where the parent directory should be
    let blocker = temp_dir.path().join("blocker");
    std::fs::write(&blocker, b"x").unwrap();
    let result = SqliteStore::init(&blocker.join("offline.db"));
    assert!(matches!(result, Err(OfflineError::StorageUnavailable(_))));
  }
}
