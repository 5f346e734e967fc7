//! Short-lived, in-process store for large tool payloads.
//!
//! Tools that produce oversized visualization data (GeoJSON boundaries, hourly
//! series) park it here and hand the model a small reference instead. The
//! stream resolver swaps the reference back for the payload on the way to the
//! client and consumes the entry. Entries older than the TTL are swept on every
//! [`ReferenceCache::store`], whether or not they were ever read.
//!
//! The cache is an explicit object owned by the application root and shared
//! through an `Arc`, so each test can work with a fresh instance.
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub id: String,
    pub payload: Value,
    pub created_at: Instant,
}

#[derive(Debug)]
pub struct ReferenceCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl Default for ReferenceCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl ReferenceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.duration_since(entry.created_at) > self.ttl
    }

    /// Store a payload under a fresh reference id, then sweep expired entries
    pub fn store(&self, payload: Value) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Instant::now();

        let mut entries = self.entries();
        entries.insert(
            id.clone(),
            CacheEntry {
                id: id.clone(),
                payload,
                created_at: now,
            },
        );

        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        let swept = before - entries.len();
        if swept > 0 {
            tracing::debug!(swept, remaining = entries.len(), "swept expired payload references");
        }

        id
    }

    /// Look up a payload without consuming it. Expired entries are evicted and reported absent.
    pub fn get(&self, id: &str) -> Option<Value> {
        let mut entries = self.entries();
        let expired = self.is_expired(entries.get(id)?, Instant::now());
        if expired {
            entries.remove(id);
            None
        } else {
            entries.get(id).map(|entry| entry.payload.clone())
        }
    }

    /// Delete an entry. Removing a missing id is a no-op.
    pub fn remove(&self, id: &str) {
        self.entries().remove(id);
    }

    /// Look up and delete an entry under a single lock, so a reference resolves at most once
    pub fn take(&self, id: &str) -> Option<Value> {
        let entry = self.entries().remove(id)?;
        if self.is_expired(&entry, Instant::now()) {
            None
        } else {
            Some(entry.payload)
        }
    }

    /// Number of entries currently held, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
