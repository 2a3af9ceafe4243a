use super::CacheEntry;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{error, info};

/// Remote key-value tier shared between proxy instances.
///
/// Failures are logged and surface as a miss (read) or no-op (write); the
/// remote tier must never take a request down with it.
#[derive(Clone)]
pub struct RemoteCache {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RemoteCache {
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to remote cache");
        Ok(Self {
            conn,
            key_prefix: "torii".to_string(),
        })
    }

    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let full_key = format!("{}:{}", self.key_prefix, key);
        let mut conn = self.conn.clone();
        match redis::cmd("GET")
            .arg(&full_key)
            .query_async::<Option<String>>(&mut conn)
            .await
        {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    error!("Remote cache entry for {} is corrupt: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                error!("Remote cache GET failed: {}", e);
                None
            }
        }
    }

    pub async fn put(&self, key: &str, entry: &CacheEntry, ttl: Duration) {
        let full_key = format!("{}:{}", self.key_prefix, key);
        let json = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize cache entry for {}: {}", key, e);
                return;
            }
        };
        let mut conn = self.conn.clone();
        if let Err(e) = redis::cmd("SET")
            .arg(&full_key)
            .arg(&json)
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async::<()>(&mut conn)
            .await
        {
            error!("Remote cache SET failed: {}", e);
        }
    }
}
