pub mod handlers;
pub mod state;

use crate::config::Config;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use state::AppState;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info};

/// Start the Axum HTTP server
pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let port = config.port;

    // Install Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");
    info!("Prometheus metrics recorder installed");

    // Create shared application state
    let state = AppState::new(config).await;

    // Spawn background sweeper for the signed-handle table (prevents
    // unredeemed handles from accumulating between requests)
    if let Some(handles) = state.handles.clone() {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                let removed = handles.sweep();
                if removed > 0 {
                    info!(
                        "Handle sweep: removed {} expired handles ({} live)",
                        removed,
                        handles.len()
                    );
                }
                crate::metrics::set_active_handles(handles.len());
            }
        });
    }

    let app = build_router(state, Some(prometheus_handle));

    // Bind TCP listener
    let addr = format!("0.0.0.0:{}", port);
    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(
                "Failed to bind to {}: {}. Is port {} already in use?",
                addr, e, port
            );
            return Err(e.into());
        }
    };

    info!("Server bound to {}", addr);
    info!("  Health:  /health");
    info!("  Metrics: /metrics");
    info!("  Proxy:   /m3u8?url=<origin-playlist>");

    // Start serving with graceful shutdown
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("Server shut down gracefully");
    Ok(())
}

/// Build the router with all routes. Exposed for integration tests.
pub fn build_router(state: AppState, prometheus: Option<PrometheusHandle>) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    let mut app = Router::new()
        .route("/", get(handlers::health::health_check))
        .route("/health", get(handlers::health::health_check))
        // Proxy endpoint: playlists, subtitles, manifests, segments
        .route(
            "/m3u8",
            get(handlers::proxy::serve_proxy).options(handlers::proxy::preflight),
        )
        // Scraper endpoints
        .route(
            "/episode/servers",
            get(handlers::episodes::episode_servers),
        )
        .route(
            "/episode/sources",
            get(handlers::episodes::episode_sources),
        )
        .route("/episode/prewarm", post(handlers::episodes::prewarm))
        .route("/anime/{id}", get(handlers::catalog::anime_info))
        .route("/search", get(handlers::catalog::search))
        .route("/home", get(handlers::catalog::home));

    if let Some(handle) = prometheus {
        app = app.route(
            "/metrics",
            get(move || handlers::metrics::serve_metrics(handle)),
        );
    }

    app.layer(cors).with_state(state)
}

// CORS envelope: players fetch playlists and segments cross-origin, so the
// proxy must expose length/range headers on every response.
fn cors_layer(origins: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([header::CONTENT_LENGTH, header::CONTENT_RANGE]);

    if origins.trim() == "*" {
        layer.allow_origin(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|origin| origin.trim().parse().ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(parsed))
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
