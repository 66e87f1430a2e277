//! Idempotency-key arbitration for ride intake.
//!
//! A key maps to the SHA-256 of the request that first used it plus the
//! response eventually produced. Replays with the same hash get the cached
//! response; the same key with a different hash is a conflict. The store is
//! capacity-bounded (LRU) and records expire after the configured TTL.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Deterministic hash over (method, path, body).
pub fn request_hash(method: &str, path: &str, body: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"\n");
    hasher.update(path.as_bytes());
    hasher.update(b"\n");
    hasher.update(body.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
struct IdempotencyRecord {
    request_hash: String,
    response: Option<Value>,
    expires_at: Instant,
}

/// Outcome of presenting a key at intake.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyArbitration {
    /// First use of the key; the caller owns the request and must later
    /// `complete` or `abandon` it.
    New,
    /// Same key, same body, response already cached.
    Replay(Value),
    /// Same key, same body, but the first request is still executing.
    InFlight,
    /// Same key, different body.
    Conflict,
}

#[derive(Debug)]
pub struct IdempotencyStore {
    records: Mutex<LruCache<String, IdempotencyRecord>>,
    ttl: Duration,
}

const DEFAULT_CAPACITY: usize = 100_000;

impl IdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            records: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// First-writer-wins arbitration for a key/hash pair.
    pub fn begin(&self, key: &str, request_hash: &str) -> KeyArbitration {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        if let Some(record) = records.get(key) {
            if record.expires_at > now {
                if record.request_hash != request_hash {
                    return KeyArbitration::Conflict;
                }
                return match &record.response {
                    Some(response) => KeyArbitration::Replay(response.clone()),
                    None => KeyArbitration::InFlight,
                };
            }
            records.pop(key);
        }
        records.put(
            key.to_string(),
            IdempotencyRecord {
                request_hash: request_hash.to_string(),
                response: None,
                expires_at: now + self.ttl,
            },
        );
        KeyArbitration::New
    }

    /// Attach the response produced by the first request for this key.
    pub fn complete(&self, key: &str, response: Value) {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(record) = records.get_mut(key) {
            record.response = Some(response);
        }
    }

    /// Release a reservation whose request aborted before producing a
    /// response, so a retry is not misread as in-flight.
    pub fn abandon(&self, key: &str) {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(record) = records.peek(key) {
            if record.response.is_none() {
                records.pop(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_hash_is_deterministic_and_body_sensitive() {
        let a = request_hash("POST", "/api/v1/rides", &json!({"riderId": "r1"}));
        let b = request_hash("POST", "/api/v1/rides", &json!({"riderId": "r1"}));
        let c = request_hash("POST", "/api/v1/rides", &json!({"riderId": "r2"}));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn first_use_is_new_then_replay_after_completion() {
        let store = IdempotencyStore::new(Duration::from_secs(60));
        assert_eq!(store.begin("k1", "h1"), KeyArbitration::New);
        store.complete("k1", json!({"id": "ride-1"}));
        match store.begin("k1", "h1") {
            KeyArbitration::Replay(response) => assert_eq!(response["id"], "ride-1"),
            other => panic!("expected replay, got {other:?}"),
        }
    }

    #[test]
    fn same_key_different_hash_conflicts() {
        let store = IdempotencyStore::new(Duration::from_secs(60));
        assert_eq!(store.begin("k1", "h1"), KeyArbitration::New);
        assert_eq!(store.begin("k1", "h2"), KeyArbitration::Conflict);
    }

    #[test]
    fn same_key_same_hash_while_executing_is_in_flight() {
        let store = IdempotencyStore::new(Duration::from_secs(60));
        assert_eq!(store.begin("k1", "h1"), KeyArbitration::New);
        assert_eq!(store.begin("k1", "h1"), KeyArbitration::InFlight);
    }

    #[test]
    fn abandon_releases_the_reservation() {
        let store = IdempotencyStore::new(Duration::from_secs(60));
        assert_eq!(store.begin("k1", "h1"), KeyArbitration::New);
        store.abandon("k1");
        assert_eq!(store.begin("k1", "h1"), KeyArbitration::New);
    }

    #[test]
    fn abandon_keeps_completed_records() {
        let store = IdempotencyStore::new(Duration::from_secs(60));
        assert_eq!(store.begin("k1", "h1"), KeyArbitration::New);
        store.complete("k1", json!({"id": "ride-1"}));
        store.abandon("k1");
        assert!(matches!(store.begin("k1", "h1"), KeyArbitration::Replay(_)));
    }

    #[test]
    fn expired_records_allow_reuse() {
        let store = IdempotencyStore::new(Duration::from_millis(10));
        assert_eq!(store.begin("k1", "h1"), KeyArbitration::New);
        store.complete("k1", json!({}));
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(store.begin("k1", "h2"), KeyArbitration::New);
    }
}
