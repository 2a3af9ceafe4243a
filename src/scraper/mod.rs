pub mod cache;

use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

/// Origin discovery for episode streams.
///
/// The production implementation talks to the upstream scraper's JSON API;
/// tests substitute fakes through [`ScraperHandle::preset`].
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn episode_sources(&self, episode_id: &str, category: &str, server: &str)
    -> Result<Value>;
    async fn episode_servers(&self, episode_id: &str) -> Result<Value>;
    async fn anime_info(&self, anime_id: &str) -> Result<Value>;
    async fn search(&self, query: &str) -> Result<Value>;
    async fn home(&self) -> Result<Value>;
}

/// JSON API client for the upstream scraper service.
pub struct UpstreamScraper {
    client: Client,
    base_url: String,
}

impl UpstreamScraper {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");
        Self { client, base_url }
    }

    async fn get_json(&self, path_and_query: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProxyError::Scrape(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::Scrape(format!(
                "scraper API returned status {status}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProxyError::Scrape(format!("invalid scraper API response: {e}")))?;
        // The API wraps results in {data}; tolerate unwrapped payloads too.
        Ok(body.get("data").cloned().unwrap_or(body))
    }
}

#[async_trait]
impl SourceProvider for UpstreamScraper {
    async fn episode_sources(
        &self,
        episode_id: &str,
        category: &str,
        server: &str,
    ) -> Result<Value> {
        self.get_json(&format!(
            "/episode/sources?animeEpisodeId={}&category={}&server={}",
            urlencoding::encode(episode_id),
            urlencoding::encode(category),
            urlencoding::encode(server)
        ))
        .await
    }

    async fn episode_servers(&self, episode_id: &str) -> Result<Value> {
        self.get_json(&format!(
            "/episode/servers?animeEpisodeId={}",
            urlencoding::encode(episode_id)
        ))
        .await
    }

    async fn anime_info(&self, anime_id: &str) -> Result<Value> {
        self.get_json(&format!("/anime/{}", urlencoding::encode(anime_id)))
            .await
    }

    async fn search(&self, query: &str) -> Result<Value> {
        self.get_json(&format!("/search?q={}", urlencoding::encode(query)))
            .await
    }

    async fn home(&self) -> Result<Value> {
        self.get_json("/home").await
    }
}

/// Lazily initialized scraper with single-flight semantics.
///
/// The scraper may be expensive to stand up, so nothing happens until the
/// first request needs it; concurrent first requests share one initialization
/// attempt through [`OnceCell`]. A failed attempt leaves the cell empty, so
/// later requests retry instead of observing a poisoned scraper.
pub struct ScraperHandle {
    api_url: Option<String>,
    provider: OnceCell<Arc<dyn SourceProvider>>,
}

impl ScraperHandle {
    pub fn new(api_url: Option<String>) -> Self {
        Self {
            api_url,
            provider: OnceCell::new(),
        }
    }

    /// Hand a pre-built provider to the handle. Used by tests to substitute
    /// fakes without touching the network.
    pub fn preset(provider: Arc<dyn SourceProvider>) -> Self {
        Self {
            api_url: None,
            provider: OnceCell::new_with(Some(provider)),
        }
    }

    pub async fn get(&self) -> Result<Arc<dyn SourceProvider>> {
        if let Some(provider) = self.provider.get() {
            return Ok(provider.clone());
        }
        let api_url = self
            .api_url
            .clone()
            .ok_or_else(|| ProxyError::Unavailable("SCRAPER_API_URL is not configured".into()))?;

        self.provider
            .get_or_try_init(|| async move {
                let scraper = UpstreamScraper::new(api_url);
                // Probe the API once so a dead scraper is caught at init,
                // not on every later call.
                scraper
                    .home()
                    .await
                    .map_err(|e| ProxyError::Unavailable(format!("scraper init failed: {e}")))?;
                info!("Scraper initialized");
                Ok(Arc::new(scraper) as Arc<dyn SourceProvider>)
            })
            .await
            .cloned()
    }
}
