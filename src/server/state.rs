use crate::{
    cache::CacheTier,
    config::Config,
    fetch::OriginFetcher,
    scraper::{ScraperHandle, SourceProvider, cache::SourceCache},
    sign::{HANDLE_CAP, HANDLE_TTL, HandleTable},
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Shared origin fetcher (connection-pooled HTTP client)
    pub fetcher: OriginFetcher,
    /// Two-tier response cache
    pub cache: Arc<CacheTier>,
    /// Scraper-record view over the cache
    pub sources: Arc<SourceCache>,
    /// Signed-handle table, present only when SIGNED_URLS is on
    pub handles: Option<Arc<HandleTable>>,
    /// Lazily initialized origin-discovery scraper
    pub scraper: Arc<ScraperHandle>,
    /// Composite keys with a pre-warm currently in flight
    pub inflight: Arc<DashMap<String, ()>>,
    /// Server start time for uptime tracking
    pub started_at: Instant,
}

impl AppState {
    /// Create a new AppState with the given configuration
    pub async fn new(config: Config) -> Self {
        let fetcher = OriginFetcher::new(config.allow_private_origins);

        #[cfg(feature = "remote-cache")]
        let cache = match &config.cache_url {
            Some(url) => {
                Arc::new(CacheTier::with_remote(config.memory_cache_bytes, url).await)
            }
            None => Arc::new(CacheTier::in_memory(config.memory_cache_bytes)),
        };
        #[cfg(not(feature = "remote-cache"))]
        let cache = {
            if config.cache_url.is_some() {
                tracing::warn!(
                    "CACHE_URL is set but the remote-cache feature is not compiled in"
                );
            }
            Arc::new(CacheTier::in_memory(config.memory_cache_bytes))
        };

        let sources = Arc::new(SourceCache::new(cache.clone()));

        let handles = if config.signed_urls {
            let secret = config
                .hmac_secret
                .as_deref()
                .expect("HMAC_SECRET is required when SIGNED_URLS=true");
            info!("URL strategy: signed handles");
            Some(Arc::new(HandleTable::new(secret, HANDLE_CAP, HANDLE_TTL)))
        } else {
            info!("URL strategy: pass-through");
            None
        };

        let scraper = Arc::new(ScraperHandle::new(config.scraper_api_url.clone()));

        Self {
            config: Arc::new(config),
            fetcher,
            cache,
            sources,
            handles,
            scraper,
            inflight: Arc::new(DashMap::new()),
            started_at: Instant::now(),
        }
    }

    /// Replace the scraper with a pre-built provider. Lets tests run the full
    /// HTTP pipeline against a fake without network access.
    pub fn with_provider(mut self, provider: Arc<dyn SourceProvider>) -> Self {
        self.scraper = Arc::new(ScraperHandle::preset(provider));
        self
    }
}
