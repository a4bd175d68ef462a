//! Core traits and types for the record store.

use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;

use crate::error::OfflineError;

/// Named collections inside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
  /// Writes waiting to be replayed
  Mutations,
  /// Responses of successful reads
  Cache,
}

impl Collection {
  pub fn as_str(&self) -> &'static str {
    match self {
      Collection::Mutations => "mutations",
      Collection::Cache => "cache",
    }
  }
}

/// Trait for values that can be stored.
///
/// Implementors provide a unique id inside their collection and a sort key.
/// Sort keys compare lexically, so timestamps must be fixed width.
pub trait Record: Send + Sync + Serialize + DeserializeOwned {
  const COLLECTION: Collection;

  fn record_id(&self) -> String;

  fn sort_key(&self) -> String;
}

/// A record as the backends see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
  pub id: String,
  pub sort_key: String,
  pub data: Vec<u8>,
}

impl RawRecord {
  pub fn encode<R: Record>(record: &R) -> Result<Self, OfflineError> {
    Ok(Self {
      id: record.record_id(),
      sort_key: record.sort_key(),
      data: serde_json::to_vec(record)?,
    })
  }

  pub fn decode<R: Record>(&self) -> Result<R, OfflineError> {
    Ok(serde_json::from_slice(&self.data)?)
  }
}

/// Snapshot of a collection, ordered by sort key.
///
/// Rows are fetched once; each one is decoded only when iterated. `iter` can be
/// called any number of times.
pub struct Records<R> {
  rows: Vec<RawRecord>,
  _marker: PhantomData<fn() -> R>,
}

impl<R: Record> Records<R> {
  pub(crate) fn new(rows: Vec<RawRecord>) -> Self {
    Self {
      rows,
      _marker: PhantomData,
    }
  }

  pub fn iter(&self) -> RecordsIter<'_, R> {
    RecordsIter {
      inner: self.rows.iter(),
      _marker: PhantomData,
    }
  }

  pub fn len(&self) -> usize {
    self.rows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  /// Decode everything, skipping rows that no longer match the schema.
  pub fn decoded(&self) -> Vec<R> {
    self
      .iter()
      .filter_map(|r| match r {
        Ok(record) => Some(record),
        Err(e) => {
          tracing::warn!(collection = R::COLLECTION.as_str(), error = %e, "skipping undecodable record");
          None
        }
      })
      .collect()
  }
}

impl<'a, R: Record> IntoIterator for &'a Records<R> {
  type Item = Result<R, OfflineError>;
  type IntoIter = RecordsIter<'a, R>;

  fn into_iter(self) -> Self::IntoIter {
    self.iter()
  }
}

pub struct RecordsIter<'a, R> {
  inner: std::slice::Iter<'a, RawRecord>,
  _marker: PhantomData<fn() -> R>,
}

impl<'a, R: Record> Iterator for RecordsIter<'a, R> {
  type Item = Result<R, OfflineError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.inner.next().map(|raw| raw.decode::<R>())
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    self.inner.size_hint()
  }
}
