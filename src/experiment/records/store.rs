//! Forecast record persistence.
//!
//! The store is the only shared mutable resource of the experiment. Updates
//! are committed in batches: either every record of a batch is replaced or
//! none is.
//!
//! - [`MemoryRecordStore`]: lock-protected map, for embedding and tests
//! - [`JsonRecordStore`]: single JSON file, written to `.tmp` then renamed

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use chrono::NaiveDate;
use tracing::{debug, info};

use super::{ForecastRecord, RecordKey};
use crate::errors::{Result, StoreError};
use crate::experiment::infra::{targets, write_json_atomic};

/// Transactional store of forecast records.
pub trait RecordStore: Send + Sync {
    /// Every record, ordered by (participant, question).
    fn load_all(&self) -> Result<Vec<ForecastRecord>>;

    /// Add newly submitted records. Fails without changes on a duplicate key.
    fn insert(&self, records: Vec<ForecastRecord>) -> Result<()>;

    /// Replace existing records as one batch.
    ///
    /// Fails without changes if any record is unknown. Returns the number of
    /// records written.
    fn commit(&self, updates: Vec<ForecastRecord>) -> Result<usize>;

    /// Incomplete records with a survey date on or after `since`.
    fn pending(&self, since: NaiveDate) -> Result<Vec<ForecastRecord>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|r| !r.is_complete() && r.date() >= since)
            .collect())
    }

    /// Records whose participant has been marked complete.
    fn completed(&self) -> Result<Vec<ForecastRecord>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|r| r.is_complete())
            .collect())
    }
}

type RecordMap = BTreeMap<RecordKey, ForecastRecord>;

fn apply_insert(map: &mut RecordMap, records: Vec<ForecastRecord>) -> Result<()> {
    let mut batch_keys = BTreeSet::new();
    for r in &records {
        r.validate()?;
        let key = r.key();
        if map.contains_key(&key) || !batch_keys.insert(key) {
            return Err(StoreError::Schema(format!(
                "duplicate record ({}, {})",
                r.participant_id(),
                r.question()
            ))
            .into());
        }
    }
    for r in records {
        map.insert(r.key(), r);
    }
    Ok(())
}

fn apply_commit(map: &mut RecordMap, updates: Vec<ForecastRecord>) -> Result<usize> {
    for r in &updates {
        r.validate()?;
        if !map.contains_key(&r.key()) {
            return Err(StoreError::UnknownRecord {
                participant_id: r.participant_id().to_string(),
                question: r.question().to_string(),
            }
            .into());
        }
    }
    let n = updates.len();
    for r in updates {
        map.insert(r.key(), r);
    }
    Ok(n)
}

fn poisoned<E>(_: E) -> StoreError {
    StoreError::Unavailable("record store lock poisoned".to_string())
}

/// In-memory record store.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<RecordMap>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ForecastRecord>) -> Result<Self> {
        let store = Self::new();
        store.insert(records)?;
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for MemoryRecordStore {
    fn load_all(&self) -> Result<Vec<ForecastRecord>> {
        let map = self.records.read().map_err(poisoned)?;
        Ok(map.values().cloned().collect())
    }

    fn insert(&self, records: Vec<ForecastRecord>) -> Result<()> {
        let mut map = self.records.write().map_err(poisoned)?;
        // Validate against a scratch copy so a failure leaves the map untouched
        let mut next = map.clone();
        apply_insert(&mut next, records)?;
        *map = next;
        Ok(())
    }

    fn commit(&self, updates: Vec<ForecastRecord>) -> Result<usize> {
        let mut map = self.records.write().map_err(poisoned)?;
        let mut next = map.clone();
        let n = apply_commit(&mut next, updates)?;
        *map = next;
        debug!(target: targets::STORE, records = n, "Committed batch");
        Ok(n)
    }
}

/// Record store backed by one JSON file.
///
/// ```text
/// records.json       current snapshot (array of records)
/// records.json.tmp   written first, then renamed over the snapshot
/// ```
#[derive(Debug)]
pub struct JsonRecordStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl JsonRecordStore {
    /// Open a store at `path`, creating parent directories.
    ///
    /// A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<RecordMap> {
        if !self.path.exists() {
            return Ok(RecordMap::new());
        }
        let json = fs::read_to_string(&self.path)?;
        let records: Vec<ForecastRecord> = serde_json::from_str(&json)
            .map_err(|e| StoreError::Schema(format!("{}: {e}", self.path.display())))?;
        let mut map = RecordMap::new();
        for r in records {
            r.validate()?;
            map.insert(r.key(), r);
        }
        Ok(map)
    }

    fn write_map(&self, map: &RecordMap) -> Result<()> {
        let records: Vec<&ForecastRecord> = map.values().collect();
        write_json_atomic(&self.path, &records)
    }
}

impl RecordStore for JsonRecordStore {
    fn load_all(&self) -> Result<Vec<ForecastRecord>> {
        Ok(self.read_map()?.into_values().collect())
    }

    fn insert(&self, records: Vec<ForecastRecord>) -> Result<()> {
        let _guard = self.write_lock.lock().map_err(poisoned)?;
        let mut map = self.read_map()?;
        let n = records.len();
        apply_insert(&mut map, records)?;
        self.write_map(&map)?;
        info!(
            target: targets::STORE,
            inserted = n,
            total = map.len(),
            "Records inserted into {}",
            self.path.display()
        );
        Ok(())
    }

    fn commit(&self, updates: Vec<ForecastRecord>) -> Result<usize> {
        let _guard = self.write_lock.lock().map_err(poisoned)?;
        let mut map = self.read_map()?;
        let n = apply_commit(&mut map, updates)?;
        if n > 0 {
            self.write_map(&map)?;
        }
        info!(
            target: targets::STORE,
            committed = n,
            "Batch committed to {}",
            self.path.display()
        );
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn make_test_path() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "forecast_ax_store_test_{}_{}",
            std::process::id(),
            id
        ));
        let _ = fs::remove_dir_all(&dir);
        dir.join("records.json")
    }

    fn record(pid: &str, question: &str) -> ForecastRecord {
        ForecastRecord::from_values(
            pid,
            "control",
            question,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            &[1.0, 2.0, 3.0, 4.0, 5.0],
        )
        .unwrap()
    }

    #[test]
    fn test_memory_insert_and_load() {
        let store = MemoryRecordStore::new();
        store
            .insert(vec![record("u1", "crude"), record("u1", "s_and_p")])
            .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.pending(NaiveDate::MIN).unwrap().len(), 2);
        assert!(store.completed().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_insert_rejected_atomically() {
        let store = MemoryRecordStore::with_records(vec![record("u1", "crude")]).unwrap();
        let err = store.insert(vec![record("u2", "crude"), record("u1", "crude")]);
        assert!(err.is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_duplicate_within_batch_rejected() {
        let store = MemoryRecordStore::new();
        let err = store.insert(vec![
            record("u1", "crude"),
            record("u2", "crude"),
            record("u1", "crude"),
        ]);
        assert!(matches!(
            err,
            Err(crate::errors::Error::Store(StoreError::Schema(_)))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_commit_unknown_record_changes_nothing() {
        let store = MemoryRecordStore::with_records(vec![record("u1", "crude")]).unwrap();
        let mut known = record("u1", "crude");
        known.resolve(3.0, Some(-0.5));
        let unknown = record("u9", "crude");

        let err = store.commit(vec![known, unknown]).unwrap_err();
        assert!(matches!(
            err,
            crate::errors::Error::Store(StoreError::UnknownRecord { .. })
        ));
        assert!(store.load_all().unwrap()[0].outcome().is_none());
    }

    #[test]
    fn test_json_store_roundtrip() {
        let path = make_test_path();
        let store = JsonRecordStore::open(&path).unwrap();
        assert!(store.load_all().unwrap().is_empty());

        store
            .insert(vec![record("u1", "crude"), record("u2", "crude")])
            .unwrap();

        let mut updated = record("u2", "crude");
        updated.resolve(3.0, Some(-0.25));
        updated.mark_complete();
        assert_eq!(store.commit(vec![updated.clone()]).unwrap(), 1);

        let reopened = JsonRecordStore::open(&path).unwrap();
        let all = reopened.load_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1], updated);
        assert_eq!(reopened.completed().unwrap().len(), 1);

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        assert!(!PathBuf::from(tmp).exists());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_pending_respects_window() {
        let store = MemoryRecordStore::with_records(vec![record("u1", "crude")]).unwrap();
        let after = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        assert!(store.pending(after).unwrap().is_empty());
    }
}
