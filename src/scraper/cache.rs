use crate::cache::{self, CacheEntry, CacheTier, SOURCE_RETENTION_TTL};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::error;

/// A record older than this is stale: still servable, but a refresh is due.
pub const SOURCE_FRESHNESS_SECS: i64 = 1800;

/// One discovered sources descriptor, keyed by episode/category/server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceRecord {
    pub episode_id: String,
    pub category: String,
    pub server: String,
    pub payload: Value,
    /// Epoch seconds of the fetch that produced `payload`
    pub fetched_at: i64,
}

impl SourceRecord {
    pub fn new(episode_id: &str, category: &str, server: &str, payload: Value) -> Self {
        Self {
            episode_id: episode_id.to_string(),
            category: category.to_string(),
            server: server.to_string(),
            payload,
            fetched_at: Utc::now().timestamp(),
        }
    }

    pub fn composite_key(&self) -> String {
        composite_key(&self.episode_id, &self.category, &self.server)
    }

    pub fn is_fresh(&self) -> bool {
        Utc::now().timestamp() - self.fetched_at < SOURCE_FRESHNESS_SECS
    }
}

/// Uniqueness key for the scraper cache.
pub fn composite_key(episode_id: &str, category: &str, server: &str) -> String {
    format!("{episode_id}::{category}::{server}")
}

/// Scraper-record view over the shared cache tier (`src:` namespace).
///
/// Records are retained well past their freshness window so a failed refresh
/// can still serve the stale copy.
pub struct SourceCache {
    tier: Arc<CacheTier>,
}

impl SourceCache {
    pub fn new(tier: Arc<CacheTier>) -> Self {
        Self { tier }
    }

    pub async fn get(&self, composite_key: &str) -> Option<SourceRecord> {
        let key = cache::source_key(composite_key);
        let entry = self.tier.get(&key, SOURCE_RETENTION_TTL).await?;
        match serde_json::from_slice(&entry.payload) {
            Ok(record) => Some(record),
            Err(e) => {
                error!("Corrupt scraper cache record for {}: {}", composite_key, e);
                None
            }
        }
    }

    /// Full overwrite by composite key.
    pub async fn upsert(&self, record: &SourceRecord) {
        let payload = match serde_json::to_vec(record) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize scraper record: {}", e);
                return;
            }
        };
        let key = cache::source_key(&record.composite_key());
        let entry = Arc::new(CacheEntry {
            payload,
            content_type: Some("application/json".to_string()),
            is_binary: false,
        });
        self.tier.put(&key, entry, SOURCE_RETENTION_TTL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn composite_key_shape() {
        assert_eq!(
            composite_key("steins-gate-3?ep=213", "sub", "hd-1"),
            "steins-gate-3?ep=213::sub::hd-1"
        );
    }

    #[test]
    fn fresh_within_window_stale_after() {
        let mut record = SourceRecord::new("ep", "sub", "hd-1", json!({}));
        assert!(record.is_fresh());
        record.fetched_at = Utc::now().timestamp() - 3600;
        assert!(!record.is_fresh());
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let cache = SourceCache::new(Arc::new(CacheTier::in_memory(1024 * 1024)));
        let record = SourceRecord::new("ep-1", "sub", "hd-1", json!({"sources": ["a"]}));

        assert!(cache.get(&record.composite_key()).await.is_none());
        cache.upsert(&record).await;

        let back = cache.get(&record.composite_key()).await.unwrap();
        assert_eq!(back.episode_id, "ep-1");
        assert_eq!(back.payload, json!({"sources": ["a"]}));
        assert!(back.is_fresh());
    }

    #[tokio::test]
    async fn upsert_overwrites_by_composite_key() {
        let cache = SourceCache::new(Arc::new(CacheTier::in_memory(1024 * 1024)));
        let first = SourceRecord::new("ep-1", "sub", "hd-1", json!({"v": 1}));
        let second = SourceRecord::new("ep-1", "sub", "hd-1", json!({"v": 2}));

        cache.upsert(&first).await;
        cache.upsert(&second).await;

        let back = cache.get(&first.composite_key()).await.unwrap();
        assert_eq!(back.payload, json!({"v": 2}));
    }
}
