use crate::{
    error::{ProxyError, Result},
    metrics,
    server::state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;

/// `GET /anime/{id}` — anime details passthrough.
pub async fn anime_info(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Response> {
    let start = Instant::now();
    let provider = state.scraper.get().await?;
    let data = provider.anime_info(&id).await?;

    metrics::record_request("anime", 200);
    metrics::record_duration("anime", start);
    Ok(Json(json!({ "data": data })).into_response())
}

#[derive(Deserialize)]
pub struct SearchQuery {
    q: Option<String>,
}

/// `GET /search?q=` — catalog search passthrough.
pub async fn search(
    Query(params): Query<SearchQuery>,
    State(state): State<AppState>,
) -> Result<Response> {
    let start = Instant::now();
    let query = params
        .q
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ProxyError::BadRequest("Missing q parameter".to_string()))?;

    let provider = state.scraper.get().await?;
    let data = provider.search(&query).await?;

    metrics::record_request("search", 200);
    metrics::record_duration("search", start);
    Ok(Json(json!({ "data": data })).into_response())
}

/// `GET /home` — landing page payload passthrough.
pub async fn home(State(state): State<AppState>) -> Result<Response> {
    let start = Instant::now();
    let provider = state.scraper.get().await?;
    let data = provider.home().await?;

    metrics::record_request("home", 200);
    metrics::record_duration("home", start);
    Ok(Json(json!({ "data": data })).into_response())
}
