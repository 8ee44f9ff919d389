//! In-process duplicate store.
//!
//! Keeps serialized records in an ordered map so that scans can resume from
//! the last key they returned. Expired entries are skipped on read and
//! dropped on the next write.

use super::store_error;
use super::traits::{DuplicateStore, ScanCursor, ScanPage};
use crate::models::{DuplicateRecord, Fingerprint, STORE_KEY_PREFIX};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Duplicate store backed by a process-local map.
///
/// Suitable for tests and single-process deployments. State is lost when the
/// process exits.
#[derive(Debug, Default)]
pub struct MemoryDuplicateStore {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl MemoryDuplicateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a raw value under an arbitrary key.
    ///
    /// Lets tests and fixtures seed legacy or corrupt records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn insert_raw(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Duration,
    ) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().map_err(lock_error)?;
        entries.retain(|_, entry| entry.is_live(now));
        entries.insert(
            key.into(),
            Entry {
                value: value.into(),
                expires_at: expiry(now, ttl),
            },
        );
        Ok(())
    }

    /// Number of live entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        let now = Instant::now();
        let entries = self.entries.read().map_err(lock_error)?;
        Ok(entries.values().filter(|entry| entry.is_live(now)).count())
    }

    /// Whether the store holds no live entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Removes a key, as if it had expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn evict(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let mut entries = self.entries.write().map_err(lock_error)?;
        Ok(entries.remove(&fingerprint.store_key()).is_some())
    }

    fn read_live(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().map_err(lock_error)?;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(Instant::now()))
            .map(|entry| entry.value.clone()))
    }
}

impl DuplicateStore for MemoryDuplicateStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(
        &self,
        fingerprint: &Fingerprint,
        record: &DuplicateRecord,
        ttl: Duration,
    ) -> Result<()> {
        self.insert_raw(fingerprint.store_key(), record.to_json()?, ttl)
    }

    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<DuplicateRecord>> {
        let key = fingerprint.store_key();
        let Some(json) = self.read_live(&key)? else {
            return Ok(None);
        };

        match DuplicateRecord::from_json(&key, &json) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Treating malformed record as absent");
                Ok(None)
            },
        }
    }

    async fn scan(&self, cursor: ScanCursor, batch_size: usize) -> Result<ScanPage> {
        let now = Instant::now();
        let entries = self.entries.read().map_err(lock_error)?;

        let lower = match &cursor {
            ScanCursor::Start => Bound::Included(STORE_KEY_PREFIX.to_string()),
            ScanCursor::Resume(last) => Bound::Excluded(last.clone()),
        };

        let mut live = entries
            .range((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(STORE_KEY_PREFIX))
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key);

        let page: Vec<&String> = live.by_ref().take(batch_size.max(1)).collect();
        let more = live.next().is_some();

        let next = match page.last() {
            Some(last) if more => Some(ScanCursor::Resume((*last).clone())),
            _ => None,
        };

        Ok(ScanPage {
            keys: page
                .into_iter()
                .filter_map(|key| Fingerprint::from_store_key(key))
                .collect(),
            next,
        })
    }
}

fn expiry(now: Instant, ttl: Duration) -> Instant {
    // Far enough in the future for any realistic process lifetime.
    now.checked_add(ttl)
        .unwrap_or_else(|| now + Duration::from_secs(100 * 365 * 24 * 3600))
}

fn lock_error<T>(e: std::sync::PoisonError<T>) -> Error {
    store_error(
        "memory_store_lock",
        Error::OperationFailed {
            operation: "memory_store_lock".to_string(),
            cause: e.to_string(),
        },
    )
}
