use crate::{
    error::{ProxyError, Result},
    metrics,
    scraper::cache::{SourceRecord, composite_key},
    server::state::AppState,
};
use axum::{
    Json,
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Instant;
use tracing::{info, warn};

const DEFAULT_CATEGORY: &str = "sub";
const DEFAULT_SERVER: &str = "hd-1";
const CATEGORIES: &[&str] = &["sub", "dub", "raw"];

// `base` optionally followed by `?ep=<digits>`; any other query fragment is
// discarded.
static EPISODE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^?]+)(\?ep=(\d+))?").expect("episode id pattern compiles")
});

/// Reduce a raw `animeEpisodeId` to its canonical `base[?ep=digits]` form.
pub fn sanitize_episode_id(raw: &str) -> Result<String> {
    let decoded = urlencoding::decode(raw)
        .map_err(|_| ProxyError::BadRequest("Un-decodable animeEpisodeId".to_string()))?;
    let captures = EPISODE_ID_RE
        .captures(&decoded)
        .ok_or_else(|| ProxyError::BadRequest("Invalid animeEpisodeId".to_string()))?;

    let base = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    if base.is_empty() {
        return Err(ProxyError::BadRequest("Invalid animeEpisodeId".to_string()));
    }
    Ok(match captures.get(3) {
        Some(ep) => format!("{base}?ep={}", ep.as_str()),
        None => base.to_string(),
    })
}

fn validate_category(category: Option<String>) -> Result<String> {
    let category = category.unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
    if CATEGORIES.contains(&category.as_str()) {
        Ok(category)
    } else {
        Err(ProxyError::BadRequest(format!(
            "Unknown category '{category}', expected one of sub/dub/raw"
        )))
    }
}

#[derive(Deserialize)]
pub struct ServersQuery {
    #[serde(rename = "animeEpisodeId")]
    anime_episode_id: Option<String>,
}

/// `GET /episode/servers` — list available servers for an episode.
pub async fn episode_servers(
    Query(params): Query<ServersQuery>,
    State(state): State<AppState>,
) -> Result<Response> {
    let start = Instant::now();
    let raw = params
        .anime_episode_id
        .ok_or_else(|| ProxyError::BadRequest("Missing animeEpisodeId".to_string()))?;
    let episode_id = sanitize_episode_id(&raw)?;

    let provider = state.scraper.get().await?;
    let data = provider.episode_servers(&episode_id).await?;

    metrics::record_request("episode/servers", 200);
    metrics::record_duration("episode/servers", start);
    Ok(Json(json!({ "data": data })).into_response())
}

#[derive(Deserialize)]
pub struct SourcesQuery {
    #[serde(rename = "animeEpisodeId")]
    anime_episode_id: Option<String>,
    category: Option<String>,
    server: Option<String>,
}

/// `GET /episode/sources` — resolve stream sources for an episode.
///
/// Fresh scraper-cache records short-circuit discovery. A failed discovery
/// never invalidates a stale record; the stale copy is served with
/// `stale: true` instead.
pub async fn episode_sources(
    Query(params): Query<SourcesQuery>,
    State(state): State<AppState>,
) -> Result<Response> {
    let start = Instant::now();
    let raw = params
        .anime_episode_id
        .ok_or_else(|| ProxyError::BadRequest("Missing animeEpisodeId".to_string()))?;
    let episode_id = sanitize_episode_id(&raw)?;
    let category = validate_category(params.category)?;
    let server = params.server.unwrap_or_else(|| DEFAULT_SERVER.to_string());

    let key = composite_key(&episode_id, &category, &server);
    let existing = state.sources.get(&key).await;

    if let Some(record) = &existing
        && record.is_fresh()
    {
        metrics::record_request("episode/sources", 200);
        metrics::record_duration("episode/sources", start);
        return Ok(Json(json!({ "data": record.payload, "fromCache": true })).into_response());
    }

    // Missing or stale: attempt discovery.
    let attempt = match state.scraper.get().await {
        Ok(provider) => provider.episode_sources(&episode_id, &category, &server).await,
        Err(e) => Err(e),
    };

    let response = match attempt {
        Ok(payload) => {
            let record = SourceRecord::new(&episode_id, &category, &server, payload.clone());
            state.sources.upsert(&record).await;
            Json(json!({ "data": payload, "fromCache": false })).into_response()
        }
        Err(e) => match existing {
            Some(stale) => {
                warn!("Discovery failed for {}, serving stale record: {}", key, e);
                Json(json!({ "data": stale.payload, "fromCache": true, "stale": true }))
                    .into_response()
            }
            None => return Err(e),
        },
    };

    metrics::record_request("episode/sources", 200);
    metrics::record_duration("episode/sources", start);
    Ok(response)
}

#[derive(Deserialize)]
pub struct PrewarmRequest {
    #[serde(rename = "episodeIds")]
    episode_ids: Vec<String>,
    category: Option<String>,
    server: Option<String>,
}

/// `POST /episode/prewarm` — schedule background discovery for a batch of
/// episodes and return immediately.
///
/// Idempotent: ids are de-duplicated, keys already fresh in the cache are a
/// no-op, and in-flight keys are single-flight (a second pre-warm attaches to
/// the running one instead of spawning another).
pub async fn prewarm(
    State(state): State<AppState>,
    Json(body): Json<PrewarmRequest>,
) -> Result<Response> {
    let category = validate_category(body.category)?;
    let server = body.server.unwrap_or_else(|| DEFAULT_SERVER.to_string());

    let mut seen = HashSet::new();
    let mut count = 0usize;
    for raw in &body.episode_ids {
        let Ok(episode_id) = sanitize_episode_id(raw) else {
            warn!("Skipping malformed episode id in pre-warm batch");
            continue;
        };
        if !seen.insert(episode_id.clone()) {
            continue;
        }
        count += 1;

        let key = composite_key(&episode_id, &category, &server);
        if state.inflight.insert(key.clone(), ()).is_some() {
            // Already being warmed; this request attaches to that flight.
            continue;
        }

        let state = state.clone();
        let category = category.clone();
        let server = server.clone();
        tokio::spawn(async move {
            warm_one(state, episode_id, category, server, key).await;
        });
    }

    metrics::record_prewarm_scheduled(count);
    metrics::record_request("episode/prewarm", 200);
    Ok(Json(json!({ "status": "scheduled", "count": count })).into_response())
}

async fn warm_one(state: AppState, episode_id: String, category: String, server: String, key: String) {
    let still_fresh = state
        .sources
        .get(&key)
        .await
        .is_some_and(|record| record.is_fresh());

    if !still_fresh {
        match state.scraper.get().await {
            Ok(provider) => {
                match provider.episode_sources(&episode_id, &category, &server).await {
                    Ok(payload) => {
                        let record = SourceRecord::new(&episode_id, &category, &server, payload);
                        state.sources.upsert(&record).await;
                        info!("Pre-warmed sources for {}", key);
                    }
                    Err(e) => warn!("Pre-warm discovery failed for {}: {}", key, e),
                }
            }
            Err(e) => warn!("Pre-warm skipped, scraper unavailable: {}", e),
        }
    }

    state.inflight.remove(&key);
}
