use super::CacheEntry;
use lru::LruCache;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct Stored {
    entry: Arc<CacheEntry>,
    expires_at: Instant,
}

struct Inner {
    entries: LruCache<String, Stored>,
    used_bytes: usize,
}

/// In-process cache: LRU eviction on a total payload byte budget, per-entry
/// TTL checked on read. Eviction happens under the same lock as the insert
/// that triggered it, so readers never see a half-applied budget.
pub struct MemoryCache {
    inner: Mutex<Inner>,
    budget: usize,
}

impl MemoryCache {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                used_bytes: 0,
            }),
            budget: budget_bytes,
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let mut inner = self.inner.lock().expect("memory cache lock poisoned");
        let expired = match inner.entries.get(key) {
            Some(stored) if stored.expires_at > Instant::now() => {
                return Some(stored.entry.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired
            && let Some(stored) = inner.entries.pop(key)
        {
            inner.used_bytes -= stored.entry.payload.len();
        }
        None
    }

    /// Full-overwrite insert; last writer wins.
    pub fn put(&self, key: &str, entry: Arc<CacheEntry>, ttl: Duration) {
        let size = entry.payload.len();
        if size > self.budget {
            return;
        }

        let mut inner = self.inner.lock().expect("memory cache lock poisoned");
        if let Some(old) = inner.entries.pop(key) {
            inner.used_bytes -= old.entry.payload.len();
        }
        inner.entries.push(
            key.to_string(),
            Stored {
                entry,
                expires_at: Instant::now() + ttl,
            },
        );
        inner.used_bytes += size;

        while inner.used_bytes > self.budget {
            match inner.entries.pop_lru() {
                Some((_, stored)) => inner.used_bytes -= stored.entry.payload.len(),
                None => break,
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    #[cfg(test)]
    pub fn used_bytes(&self) -> usize {
        self.inner.lock().unwrap().used_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(payload: &[u8]) -> Arc<CacheEntry> {
        Arc::new(CacheEntry {
            payload: payload.to_vec(),
            content_type: Some("video/MP2T".to_string()),
            is_binary: true,
        })
    }

    #[test]
    fn put_then_get() {
        let cache = MemoryCache::new(1024);
        cache.put("seg:a", entry(b"abc"), Duration::from_secs(60));
        assert_eq!(cache.get("seg:a").unwrap().payload, b"abc");
        assert_eq!(cache.used_bytes(), 3);
    }

    #[test]
    fn expired_entries_read_as_miss() {
        let cache = MemoryCache::new(1024);
        cache.put("m3u8:a", entry(b"#EXTM3U"), Duration::from_secs(0));
        assert!(cache.get("m3u8:a").is_none());
        assert_eq!(cache.used_bytes(), 0);
    }

    #[test]
    fn byte_budget_evicts_least_recent() {
        let cache = MemoryCache::new(10);
        cache.put("a", entry(b"aaaa"), Duration::from_secs(60));
        cache.put("b", entry(b"bbbb"), Duration::from_secs(60));
        // Touch "a" so "b" is least recently used
        assert!(cache.get("a").is_some());
        cache.put("c", entry(b"cccc"), Duration::from_secs(60));

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert!(cache.used_bytes() <= 10);
    }

    #[test]
    fn oversized_payload_is_skipped() {
        let cache = MemoryCache::new(4);
        cache.put("big", entry(b"too large"), Duration::from_secs(60));
        assert!(cache.get("big").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn overwrite_replaces_bytes() {
        let cache = MemoryCache::new(1024);
        cache.put("k", entry(b"aaaaaaaa"), Duration::from_secs(60));
        cache.put("k", entry(b"bb"), Duration::from_secs(60));
        assert_eq!(cache.used_bytes(), 2);
        assert_eq!(cache.get("k").unwrap().payload, b"bb");
    }
}
