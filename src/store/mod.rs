//! Local durable store for the offline layer.
//!
//! This module provides a key-indexed record store that:
//! - Survives restarts (SQLite), or lives in memory when disk is unavailable
//! - Upserts idempotently (last write wins) and deletes idempotently
//! - Returns lazy, restartable snapshots of a collection
//! - Holds the pending mutation queue and the cached reads

mod policy;
mod records;
mod storage;
mod traits;

pub use policy::CachePolicy;
pub use records::{fingerprint, CacheEntry, MutationStatus, PendingMutation};
pub use storage::{DurableStore, MemoryStore, SqliteStore, StoreExt, StoreKind};
pub use traits::Collection;
