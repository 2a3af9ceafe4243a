use crate::{
    cache::{self, CacheEntry, MAX_REMOTE_PAYLOAD, PLAYLIST_TTL, SEGMENT_TTL},
    classify::{self, ResourceKind},
    error::{ProxyError, Result},
    fetch, guard, metrics,
    rewrite::{self, ProxyLink},
    server::state::AppState,
};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use url::Url;

const PLAYLIST_CACHE_CONTROL: &str = "public, max-age=10";
const SEGMENT_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

#[derive(Deserialize)]
pub struct ProxyQuery {
    /// Pass-through origin URL
    url: Option<String>,
    /// Referer carried through from the original page
    #[serde(rename = "ref")]
    referer: Option<String>,
    /// Signed handle, mutually exclusive with `url`
    h: Option<String>,
}

/// Explicit preflight response; the CORS layer decorates it with the
/// envelope headers.
pub async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Proxy endpoint: fetch an origin resource on the player's behalf,
/// rewriting playlists/subtitles/manifests and streaming everything else.
pub async fn serve_proxy(
    Query(params): Query<ProxyQuery>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response> {
    let start = Instant::now();

    // Resolve the origin reference from a signed handle or pass-through
    // query parameters.
    let (raw_url, referer) = if let Some(token) = &params.h {
        let table = state
            .handles
            .as_deref()
            .ok_or_else(|| ProxyError::BadRequest("Signed handles are not enabled".to_string()))?;
        let entry = table.redeem(token)?;
        (entry.origin_url, entry.referer)
    } else {
        let url = params
            .url
            .clone()
            .ok_or_else(|| ProxyError::BadRequest("Missing url parameter".to_string()))?;
        (url, params.referer.clone())
    };
    let referer = referer.or_else(|| state.config.default_referer.clone());

    // User-supplied origins are an SSRF vector; validate before any I/O.
    let request_host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    let origin_url = guard::ensure_safe_origin(
        &raw_url,
        request_host,
        state.config.allow_private_origins,
    )
    .inspect_err(|e| {
        if matches!(e, ProxyError::Forbidden) {
            metrics::record_ssrf_rejection();
        }
    })?;

    let kind = classify::classify(&origin_url, None);
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    info!(
        "Proxying {} resource: {}",
        kind.label(),
        origin_url.as_str()
    );

    let result = if kind.is_text_rewritable() {
        serve_text(&state, &origin_url, referer.as_deref(), kind).await
    } else if let Some(range) = &range {
        serve_range(&state, &origin_url, referer.as_deref(), range).await
    } else if kind == ResourceKind::Opaque {
        serve_opaque(&state, &origin_url, referer.as_deref()).await
    } else {
        serve_binary(&state, &origin_url, referer.as_deref(), kind).await
    };

    match &result {
        Ok(response) => metrics::record_request("m3u8", response.status().as_u16()),
        Err(e) => {
            if matches!(
                e,
                ProxyError::Timeout | ProxyError::Origin(_) | ProxyError::Upstream(_)
            ) {
                metrics::record_origin_error();
            }
            metrics::record_request("m3u8", e.status().as_u16());
        }
    }
    metrics::record_duration("m3u8", start);

    result
}

/// Text-rewritable path: cache → fetch (with retry) → rewrite → store.
async fn serve_text(
    state: &AppState,
    origin_url: &Url,
    referer: Option<&str>,
    kind: ResourceKind,
) -> Result<Response> {
    let key = cache::playlist_key(origin_url.as_str(), referer);
    if let Some(entry) = state.cache.get(&key, PLAYLIST_TTL).await {
        return text_response(&entry);
    }

    let response = state.fetcher.fetch_playlist(origin_url, referer).await?;
    // Relative references resolve against the post-redirect URL.
    let final_url = response.url().clone();
    let body = response
        .text()
        .await
        .map_err(|e| ProxyError::Origin(e.to_string()))?;

    let rewritten = {
        let link = proxy_link(state, referer);
        rewrite::rewrite_body(kind, &body, &final_url, &link)?
    };

    let entry = Arc::new(CacheEntry {
        payload: rewritten.into_bytes(),
        content_type: Some(kind.default_content_type().to_string()),
        is_binary: false,
    });
    store_later(state, key, entry.clone(), PLAYLIST_TTL);

    text_response(&entry)
}

/// Binary path for known media kinds: cache → fetch → buffer-or-stream.
async fn serve_binary(
    state: &AppState,
    origin_url: &Url,
    referer: Option<&str>,
    kind: ResourceKind,
) -> Result<Response> {
    let key = cache::segment_key(origin_url.as_str(), referer);
    if let Some(entry) = state.cache.get(&key, SEGMENT_TTL).await {
        return binary_response(&entry);
    }

    let response = state
        .fetcher
        .fetch(origin_url, referer, None, fetch::BINARY_DEADLINE)
        .await?;
    let content_type = response_content_type(&response)
        .unwrap_or_else(|| kind.default_content_type().to_string());

    match response.content_length() {
        Some(len) if len <= MAX_REMOTE_PAYLOAD as u64 => {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| ProxyError::Origin(e.to_string()))?;
            let entry = Arc::new(CacheEntry {
                payload: bytes.to_vec(),
                content_type: Some(content_type),
                is_binary: true,
            });
            store_later(state, key, entry.clone(), SEGMENT_TTL);
            binary_response(&entry)
        }
        // Unknown or oversized: stream without buffering, never cache.
        _ => stream_response(response, &content_type),
    }
}

/// Range path: forward the range, propagate partial-content headers, and
/// bypass the cache so partial bodies are never persisted.
async fn serve_range(
    state: &AppState,
    origin_url: &Url,
    referer: Option<&str>,
    range: &str,
) -> Result<Response> {
    let response = state
        .fetcher
        .fetch(origin_url, referer, Some(range), fetch::BINARY_DEADLINE)
        .await?;
    let content_type = response_content_type(&response)
        .unwrap_or_else(|| "application/octet-stream".to_string());
    stream_response(response, &content_type)
}

/// Suffix-less URLs: fetch, then let the Content-Type decide between the
/// rewrite path and a straight pipe. Opaque bodies never touch the cache.
async fn serve_opaque(
    state: &AppState,
    origin_url: &Url,
    referer: Option<&str>,
) -> Result<Response> {
    let response = state
        .fetcher
        .fetch(origin_url, referer, None, fetch::BINARY_DEADLINE)
        .await?;
    let final_url = response.url().clone();
    let content_type = response_content_type(&response);

    let refined = classify::classify(&final_url, content_type.as_deref());
    if refined.is_text_rewritable() {
        let body = response
            .text()
            .await
            .map_err(|e| ProxyError::Origin(e.to_string()))?;
        let rewritten = {
            let link = proxy_link(state, referer);
            rewrite::rewrite_body(refined, &body, &final_url, &link)?
        };
        return text_response(&CacheEntry {
            payload: rewritten.into_bytes(),
            content_type: Some(refined.default_content_type().to_string()),
            is_binary: false,
        });
    }

    let content_type =
        content_type.unwrap_or_else(|| "application/octet-stream".to_string());
    stream_response(response, &content_type)
}

fn proxy_link<'a>(state: &'a AppState, referer: Option<&'a str>) -> ProxyLink<'a> {
    match state.handles.as_deref() {
        Some(table) => ProxyLink::Signed { table, referer },
        None => ProxyLink::PassThrough { referer },
    }
}

// Fire-and-forget cache write; the response never waits on cache I/O, and a
// late write for the same key simply overwrites (last writer wins).
fn store_later(state: &AppState, key: String, entry: Arc<CacheEntry>, ttl: std::time::Duration) {
    let cache = state.cache.clone();
    tokio::spawn(async move {
        cache.put(&key, entry, ttl).await;
    });
}

fn response_content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn text_response(entry: &CacheEntry) -> Result<Response> {
    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            entry
                .content_type
                .as_deref()
                .unwrap_or("application/vnd.apple.mpegurl"),
        )
        .header(header::CACHE_CONTROL, PLAYLIST_CACHE_CONTROL)
        .body(Body::from(entry.payload.clone()))
        .map_err(|e| ProxyError::Internal(format!("Failed to build response: {e}")))
}

fn binary_response(entry: &CacheEntry) -> Result<Response> {
    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            entry.content_type.as_deref().unwrap_or("video/MP2T"),
        )
        .header(header::CACHE_CONTROL, SEGMENT_CACHE_CONTROL)
        .header(header::ACCEPT_RANGES, "bytes")
        .body(Body::from(entry.payload.clone()))
        .map_err(|e| ProxyError::Internal(format!("Failed to build response: {e}")))
}

/// Pipe an origin body through without buffering. Status (200/206) and
/// length/range headers carry over; dropping the response cancels the
/// upstream transfer.
fn stream_response(response: reqwest::Response, content_type: &str) -> Result<Response> {
    let status = response.status();
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, SEGMENT_CACHE_CONTROL)
        .header(header::ACCEPT_RANGES, "bytes");

    for name in [header::CONTENT_LENGTH, header::CONTENT_RANGE] {
        if let Some(value) = response.headers().get(&name) {
            builder = builder.header(name, value.clone());
        }
    }

    builder
        .body(Body::from_stream(response.bytes_stream()))
        .map_err(|e| ProxyError::Internal(format!("Failed to build response: {e}")))
}
