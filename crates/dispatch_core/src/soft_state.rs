//! Ephemeral keyed state with per-entry TTLs: presence markers, offer
//! fast-lookup entries, surge cache entries, and per-ride locks.
//!
//! Expiry is lazy: entries are dropped when a reader encounters them past
//! their deadline. Absence of an entry after its TTL is authoritative.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug, Clone)]
struct TtlEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Concurrent map whose entries expire after a per-entry TTL.
#[derive(Debug, Default)]
pub struct TtlMap<K: Eq + Hash, V> {
    entries: DashMap<K, TtlEntry<V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlMap<K, V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert or replace, resetting the entry deadline.
    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(
            key,
            TtlEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Live value for the key, dropping the entry if it has expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        None
    }

    pub fn contains_live(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    /// Keys of entries that have not yet expired.
    pub fn live_keys(&self) -> Vec<K> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Drop every expired entry. Readers already ignore them; this bounds
    /// memory between reads.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct LockEntry {
    token: u64,
    expires_at: Instant,
}

/// Acquire-with-expiry mutual exclusion keyed by string, backing the
/// per-ride lock. A failed acquire is surfaced to the caller, never retried
/// here.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: DashMap<String, LockEntry>,
    next_token: AtomicU64,
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
            next_token: AtomicU64::new(1),
        }
    }

    /// Set-if-absent-or-expired. Returns a guard that releases on drop; the
    /// TTL bounds the hold time if the guard is leaked or the holder stalls.
    pub fn try_acquire(&self, key: &str, ttl: Duration) -> Option<LockGuard<'_>> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let entry = LockEntry {
            token,
            expires_at: Instant::now() + ttl,
        };
        match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at > Instant::now() {
                    return None;
                }
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
        Some(LockGuard {
            table: self,
            key: key.to_string(),
            token,
        })
    }
}

/// Held lock; releasing checks the token so a guard that outlived its TTL
/// cannot release a successor's lock.
#[derive(Debug)]
pub struct LockGuard<'a> {
    table: &'a LockTable,
    key: String,
    token: u64,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.table
            .locks
            .remove_if(&self.key, |_, entry| entry.token == self.token);
    }
}
