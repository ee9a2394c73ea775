//! Per-user activity history with bounded retention.
//!
//! Records live in a sled tree keyed by `owner \0 created_at id`, so a
//! reverse prefix scan yields an owner's records ordered by
//! `(created_at desc, id desc)`. After every insert the [`HistoryTrimmer`]
//! deletes everything but the newest `max_per_owner` records.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use crate::types::{HistoryRecord, UserId};

/// History store errors.
#[derive(Error, Debug)]
pub enum HistoryError {
    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record cannot be stored.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// Storage capability behind the history trimmer.
///
/// Every method is scoped to a single owner. `delete_all_except` and
/// `trim_to_latest` must be atomic with respect to each other for the same
/// owner.
pub trait HistoryStore: Send + Sync {
    /// Persist a new record.
    ///
    /// # Errors
    ///
    /// Returns error if the record is invalid or storage fails.
    fn insert(&self, record: &HistoryRecord) -> Result<(), HistoryError>;

    /// List an owner's records, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if storage read fails.
    fn list(
        &self,
        owner: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HistoryRecord>, HistoryError>;

    /// Count an owner's records.
    ///
    /// # Errors
    ///
    /// Returns error if storage read fails.
    fn count(&self, owner: &UserId) -> Result<usize, HistoryError>;

    /// Delete every record of `owner` whose ID is not in `keep_ids`.
    ///
    /// Returns the number of deleted records.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails; nothing is deleted in that case.
    fn delete_all_except(&self, owner: &UserId, keep_ids: &[String])
    -> Result<usize, HistoryError>;

    /// Keep only the `max` newest records of `owner`.
    ///
    /// Returns the number of deleted records.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails; nothing is deleted in that case.
    fn trim_to_latest(&self, owner: &UserId, max: usize) -> Result<usize, HistoryError>;

    /// Persist buffered writes. Stores without write buffering do nothing.
    ///
    /// # Errors
    ///
    /// Returns error if the flush fails.
    fn flush(&self) -> Result<(), HistoryError> {
        Ok(())
    }
}

/// Separator between the owner and the rest of the key.
const OWNER_SEPARATOR: u8 = 0;

/// History store backed by sled.
///
/// sled holds an exclusive lock on its directory, so a store is only ever
/// written by one process; per-owner mutual exclusion inside that process
/// is enough to serialize trimming.
pub struct SledHistoryStore {
    db: sled::Db,
    records: sled::Tree,
    owner_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SledHistoryStore {
    /// Open or create a history store.
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        let db = sled::open(path)?;
        Self::with_db(db)
    }

    /// Create a history store on an existing sled database.
    ///
    /// # Errors
    ///
    /// Returns error if the tree cannot be opened.
    pub fn with_db(db: sled::Db) -> Result<Self, HistoryError> {
        let records = db.open_tree("history")?;
        Ok(Self {
            db,
            records,
            owner_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Run `f` while holding the owner's lock.
    fn with_owner_lock<T>(&self, owner: &UserId, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self
                .owner_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(owner.0.clone()).or_default())
        };

        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut locks = self
            .owner_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        if locks
            .get(&owner.0)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(&owner.0);
        }

        result
    }

    /// Remove `keys` in one atomic batch.
    fn remove_keys(&self, keys: Vec<sled::IVec>) -> Result<usize, HistoryError> {
        let removed = keys.len();
        if removed == 0 {
            return Ok(0);
        }

        let mut batch = sled::Batch::default();
        for key in keys {
            batch.remove(key);
        }
        self.records.apply_batch(batch)?;
        Ok(removed)
    }

    /// Keys of an owner's records, newest first.
    fn keys_newest_first(
        &self,
        owner: &UserId,
    ) -> impl Iterator<Item = Result<sled::IVec, sled::Error>> {
        self.records
            .scan_prefix(owner_prefix(owner))
            .rev()
            .map(|entry| entry.map(|(key, _)| key))
    }

    #[cfg(test)]
    fn tracked_owner_locks(&self) -> usize {
        self.owner_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl HistoryStore for SledHistoryStore {
    fn insert(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        if record.owner.0.is_empty() || record.owner.0.as_bytes().contains(&OWNER_SEPARATOR) {
            return Err(HistoryError::InvalidRecord(format!(
                "owner '{}' is not a valid key",
                record.owner
            )));
        }

        let value = serde_json::to_vec(record)?;
        self.records.insert(record_key(record), value)?;
        Ok(())
    }

    fn list(
        &self,
        owner: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        let mut records = Vec::new();

        for entry in self
            .records
            .scan_prefix(owner_prefix(owner))
            .rev()
            .skip(offset)
            .take(limit)
        {
            let (_, value) = entry?;
            records.push(serde_json::from_slice(&value)?);
        }

        Ok(records)
    }

    fn count(&self, owner: &UserId) -> Result<usize, HistoryError> {
        let mut count = 0;
        for key in self.keys_newest_first(owner) {
            key?;
            count += 1;
        }
        Ok(count)
    }

    fn delete_all_except(
        &self,
        owner: &UserId,
        keep_ids: &[String],
    ) -> Result<usize, HistoryError> {
        self.with_owner_lock(owner, || {
            let mut doomed = Vec::new();
            for entry in self.records.scan_prefix(owner_prefix(owner)) {
                let (key, value) = entry?;
                let record: HistoryRecord = serde_json::from_slice(&value)?;
                if !keep_ids.contains(&record.id) {
                    doomed.push(key);
                }
            }
            self.remove_keys(doomed)
        })
    }

    fn trim_to_latest(&self, owner: &UserId, max: usize) -> Result<usize, HistoryError> {
        self.with_owner_lock(owner, || {
            let doomed = self
                .keys_newest_first(owner)
                .skip(max)
                .collect::<Result<Vec<_>, _>>()?;
            let removed = self.remove_keys(doomed)?;
            tracing::debug!(owner = %owner, removed, max, "Trimmed activity history");
            Ok(removed)
        })
    }

    fn flush(&self) -> Result<(), HistoryError> {
        let bytes = self.db.flush()?;
        tracing::debug!(bytes, "Flushed activity history");
        Ok(())
    }
}

impl std::fmt::Debug for SledHistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledHistoryStore")
            .field("records", &self.records.len())
            .finish_non_exhaustive()
    }
}

fn owner_prefix(owner: &UserId) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(owner.0.len() + 1);
    prefix.extend_from_slice(owner.0.as_bytes());
    prefix.push(OWNER_SEPARATOR);
    prefix
}

/// `owner \0 seconds(8 bytes, order preserving) nanos(4 bytes) id`
///
/// Keeps the full nanosecond precision of `created_at`, so key order is
/// exactly `(created_at, id)`.
fn record_key(record: &HistoryRecord) -> Vec<u8> {
    let mut key = owner_prefix(&record.owner);
    // Flip the sign bit so negative timestamps still sort before positive ones.
    #[allow(clippy::cast_sign_loss)]
    let seconds = (record.created_at.timestamp() as u64) ^ (1 << 63);
    key.extend_from_slice(&seconds.to_be_bytes());
    key.extend_from_slice(&record.created_at.timestamp_subsec_nanos().to_be_bytes());
    key.extend_from_slice(record.id.as_bytes());
    key
}

/// Inserts history records and keeps each owner's history bounded.
#[derive(Clone)]
pub struct HistoryTrimmer {
    store: Arc<dyn HistoryStore>,
    max_per_owner: usize,
}

impl HistoryTrimmer {
    /// Create a trimmer keeping `max_per_owner` records per owner.
    #[must_use]
    pub fn new(store: Arc<dyn HistoryStore>, max_per_owner: usize) -> Self {
        Self {
            store,
            max_per_owner: max_per_owner.max(1),
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.store
    }

    /// Delete all but the newest `max_per_owner` records of `owner`.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn trim_to_latest(&self, owner: &UserId) -> Result<usize, HistoryError> {
        self.store.trim_to_latest(owner, self.max_per_owner)
    }

    /// Persist `record`, then trim its owner's history.
    ///
    /// A failed trim is logged and does not fail the call: the record is
    /// already stored and visible.
    ///
    /// # Errors
    ///
    /// Returns error only if the insert fails.
    pub fn record(&self, record: HistoryRecord) -> Result<HistoryRecord, HistoryError> {
        self.store.insert(&record)?;

        if let Err(e) = self.trim_to_latest(&record.owner) {
            tracing::error!(
                owner = %record.owner,
                error = %e,
                "Failed to trim activity history; owner history may exceed its bound"
            );
        }

        Ok(record)
    }
}

impl std::fmt::Debug for HistoryTrimmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryTrimmer")
            .field("max_per_owner", &self.max_per_owner)
            .finish_non_exhaustive()
    }
}
