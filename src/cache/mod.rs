mod memory;
#[cfg(feature = "remote-cache")]
mod remote;

pub use memory::MemoryCache;
#[cfg(feature = "remote-cache")]
pub use remote::RemoteCache;

use crate::metrics;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Playlist entries stay short-lived so live-edge updates reach players.
pub const PLAYLIST_TTL: Duration = Duration::from_secs(10);
/// Segment URLs are content-unique per live window, so a day is safe.
pub const SEGMENT_TTL: Duration = Duration::from_secs(86_400);
/// Physical retention for scraper records; logical freshness (30 min) is
/// judged by the reader so stale records stay servable after a failed refresh.
pub const SOURCE_RETENTION_TTL: Duration = Duration::from_secs(86_400);

/// Payloads above this size skip the remote tier.
pub const MAX_REMOTE_PAYLOAD: usize = 10 * 1024 * 1024;

/// A cached body plus enough metadata to replay the response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(with = "payload_b64")]
    pub payload: Vec<u8>,
    pub content_type: Option<String>,
    pub is_binary: bool,
}

/// Serde helper: payload bytes ↔ base64 (raw byte arrays are hostile to a
/// JSON-backed remote tier)
mod payload_b64 {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Two backends composed in order: in-process map, then the remote store.
/// Reads try memory first and back-fill it on a remote hit; writes go to
/// both, bounded by the remote size policy.
pub struct CacheTier {
    memory: MemoryCache,
    #[cfg(feature = "remote-cache")]
    remote: Option<RemoteCache>,
}

impl CacheTier {
    pub fn in_memory(budget_bytes: usize) -> Self {
        Self {
            memory: MemoryCache::new(budget_bytes),
            #[cfg(feature = "remote-cache")]
            remote: None,
        }
    }

    /// Connect the remote tier; a failed connection degrades to memory-only.
    #[cfg(feature = "remote-cache")]
    pub async fn with_remote(budget_bytes: usize, url: &str) -> Self {
        let remote = match RemoteCache::connect(url).await {
            Ok(remote) => Some(remote),
            Err(e) => {
                tracing::error!("Remote cache unavailable, running memory-only: {}", e);
                None
            }
        };
        Self {
            memory: MemoryCache::new(budget_bytes),
            remote,
        }
    }

    /// Look up `key`; `backfill_ttl` bounds how long a remote hit may live in
    /// the memory tier.
    pub async fn get(&self, key: &str, backfill_ttl: Duration) -> Option<Arc<CacheEntry>> {
        if let Some(entry) = self.memory.get(key) {
            metrics::record_cache_hit("memory");
            return Some(entry);
        }
        #[cfg(feature = "remote-cache")]
        if let Some(remote) = &self.remote
            && let Some(entry) = remote.get(key).await
        {
            metrics::record_cache_hit("remote");
            let entry = Arc::new(entry);
            self.memory.put(key, entry.clone(), backfill_ttl);
            return Some(entry);
        }
        #[cfg(not(feature = "remote-cache"))]
        let _ = backfill_ttl;

        metrics::record_cache_miss();
        None
    }

    /// Write-through to both tiers; oversized payloads stay in-process only.
    pub async fn put(&self, key: &str, entry: Arc<CacheEntry>, ttl: Duration) {
        self.memory.put(key, entry.clone(), ttl);
        #[cfg(feature = "remote-cache")]
        if let Some(remote) = &self.remote
            && entry.payload.len() <= MAX_REMOTE_PAYLOAD
        {
            remote.put(key, &entry, ttl).await;
        }
    }
}

/// Cache key for a rewritten playlist/subtitle/manifest body.
pub fn playlist_key(url: &str, referer: Option<&str>) -> String {
    format!("m3u8:{}", hash_key(url, referer))
}

/// Cache key for raw segment bytes.
pub fn segment_key(url: &str, referer: Option<&str>) -> String {
    format!("seg:{}", hash_key(url, referer))
}

/// Cache key for a scraper sources record.
pub fn source_key(composite_key: &str) -> String {
    format!("src:{composite_key}")
}

// sha256(url) truncated to 16 hex chars; the referer is appended when it
// affects what the origin serves.
fn hash_key(url: &str, referer: Option<&str>) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let mut key = hex::encode(digest)[..16].to_string();
    if let Some(referer) = referer {
        key.push_str("::ref=");
        key.push_str(referer);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_and_stable() {
        let a = playlist_key("https://cdn.example/a.m3u8", None);
        let b = playlist_key("https://cdn.example/a.m3u8", None);
        assert_eq!(a, b);
        assert!(a.starts_with("m3u8:"));
        assert_eq!(a.len(), "m3u8:".len() + 16);

        assert!(segment_key("https://cdn.example/a.ts", None).starts_with("seg:"));
        assert_eq!(source_key("ep-1::sub::hd-1"), "src:ep-1::sub::hd-1");
    }

    #[test]
    fn referer_affects_the_key() {
        let bare = segment_key("https://cdn.example/a.ts", None);
        let with_ref = segment_key("https://cdn.example/a.ts", Some("https://site.example/"));
        assert_ne!(bare, with_ref);
        assert!(with_ref.contains("::ref=https://site.example/"));
    }

    #[tokio::test]
    async fn tier_round_trips_through_memory() {
        let tier = CacheTier::in_memory(1024 * 1024);
        let entry = Arc::new(CacheEntry {
            payload: b"#EXTM3U\n".to_vec(),
            content_type: Some("application/vnd.apple.mpegurl".to_string()),
            is_binary: false,
        });
        let key = playlist_key("https://cdn.example/a.m3u8", None);

        assert!(tier.get(&key, PLAYLIST_TTL).await.is_none());
        tier.put(&key, entry, PLAYLIST_TTL).await;
        let hit = tier.get(&key, PLAYLIST_TTL).await.unwrap();
        assert_eq!(hit.payload, b"#EXTM3U\n");
    }

    #[test]
    fn entry_serde_round_trip() {
        let entry = CacheEntry {
            payload: vec![0, 159, 146, 150],
            content_type: Some("video/MP2T".to_string()),
            is_binary: true,
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.payload, entry.payload);
        assert_eq!(back.content_type, entry.content_type);
        assert!(back.is_binary);
    }
}
