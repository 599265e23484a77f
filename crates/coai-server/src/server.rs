use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use coai_engine::{Orchestrator, RateLimiter, ResponseCache};
use coai_telemetry::MetricsRecorder;

use crate::handlers;
use crate::middleware::{self, CachedResponse};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            request_timeout_secs: 120,
        }
    }
}

/// Long-lived components shared by every request.
pub struct Services {
    pub orchestrator: Arc<Orchestrator>,
    pub rate_limiter: Arc<RateLimiter>,
    pub cache: Arc<ResponseCache<CachedResponse>>,
    pub metrics: Arc<MetricsRecorder>,
}

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
}

/// `/health` is open; everything else is rate limited, and the read-only
/// GET routes are cached behind the limiter.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let cached = Router::new()
        .route("/status", get(handlers::status))
        .route("/api/agents", get(handlers::agents))
        .route("/api/usage/summary", get(handlers::usage_summary))
        .route("/api/usage/stats", get(handlers::usage_stats))
        .route_layer(from_fn_with_state(state.clone(), middleware::response_cache));

    let limited = Router::new()
        .route("/api/chat", post(handlers::chat))
        .route("/api/rules/reload", post(handlers::reload_rules))
        .route("/api/usage/export", post(handlers::usage_export))
        .merge(cached)
        .route_layer(from_fn_with_state(state.clone(), middleware::rate_limit));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(limited)
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve in the background. Port 0 picks a free port.
pub async fn start(
    config: ServerConfig,
    services: Arc<Services>,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState { services };
    let router = build_router(state, Duration::from_secs(config.request_timeout_secs));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(host = %config.host, port = local_addr.port(), "COAI server started");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        let serve = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal.cancelled_owned());
        if let Err(e) = serve.await {
            tracing::error!(error = %e, "server stopped with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        server,
    })
}

/// Keeps the serve task alive until `shutdown`.
pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "server task did not finish cleanly");
        }
    }
}
