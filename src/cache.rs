//! In-process mapping from `(stream, resource hash)` to an upstream URL.
//!
//! Entries expire a fixed TTL after insertion; a stale or unknown hash is a
//! miss, never another stream's resource. The map is bounded so a client
//! hammering the manifest endpoint cannot grow it without limit.

use lru::LruCache;
use std::{
    num::NonZeroUsize,
    sync::Mutex,
    time::{Duration, Instant},
};

/// Default entry lifetime, matching the signed-token horizon.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    stream: String,
    hash: String,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    url: String,
    expires_at: Instant,
}

/// TTL-bounded resource cache shared across request handlers.
pub struct ResourceCache {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl ResourceCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).expect("capacity must be > 0"),
            )),
            ttl,
        }
    }

    /// Store the upstream URL for a freshly minted resource hash.
    pub fn put(&self, stream: &str, hash: &str, url: impl Into<String>) {
        let key = CacheKey {
            stream: stream.to_string(),
            hash: hash.to_string(),
        };
        let entry = CacheEntry {
            url: url.into(),
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.lock().unwrap().put(key, entry);
    }

    /// Resolve a hash back to its upstream URL. Expired entries miss even
    /// if they have not been swept yet.
    pub fn get(&self, stream: &str, hash: &str) -> Option<String> {
        let key = CacheKey {
            stream: stream.to_string(),
            hash: hash.to_string(),
        };

        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(&key) {
            if entry.expires_at > Instant::now() {
                return Some(entry.url.clone());
            }
        }

        entries.pop(&key);
        None
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}
