//! weave-server: the HTTP host around the composer core.
//!
//! Role: resolve a request path to template bytes, hand them to
//! `weave-core::parse`/`render`, and stream the assembled document back.

pub mod config;
pub mod handlers;
pub mod template_source;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use config::ComposerConfig;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

/// Shared, read-only-after-startup server state.
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<ComposerConfig>,
    pub client: reqwest::Client,
    pub pipe_definition: Option<Bytes>,
    pub template_root: PathBuf,
    request_counter: Arc<AtomicU64>,
}

impl ServerState {
    pub fn new(config: ComposerConfig, template_root: PathBuf) -> anyhow::Result<Self> {
        const BUNDLED_PIPE_RUNTIME: &str = include_str!("../assets/pipe-runtime.js");

        let pipe_definition = match (&config.pipe_definition_path, &config.amd_loader_url) {
            (Some(path), _) => Some(template_source::read_file(path)?),
            (None, Some(_)) => None,
            (None, None) => Some(Bytes::from_static(BUNDLED_PIPE_RUNTIME.as_bytes())),
        };

        Ok(Self {
            config: Arc::new(config),
            client: reqwest::Client::new(),
            pipe_definition,
            template_root,
            request_counter: Arc::new(AtomicU64::new(0)),
        })
    }

    /// A short, process-unique id used when the inbound request carries no
    /// `X-Request-Id` of its own (§10.6).
    pub fn next_request_id(&self) -> String {
        let n = self.request_counter.fetch_add(1, Ordering::Relaxed);
        let started = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let hash = blake3::hash(format!("{started}-{n}").as_bytes());
        hash.to_hex()[..16].to_string()
    }
}

/// Builds the axum router: a catch-all page-compose route plus `/health`.
pub fn build_router(state: ServerState) -> Router {
    let cors = if state.config.cors_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<axum::http::HeaderValue> = state
            .config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .route("/health", get(handlers::health_check))
        .fallback(handlers::compose_page)
        .with_state(state)
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Runs the server until `SIGINT`/`SIGTERM`, letting in-flight fragment
/// fetches finish or hit their own timeout rather than being hard-killed.
pub async fn serve(addr: SocketAddr, state: ServerState) -> anyhow::Result<()> {
    tracing::info!(%addr, "weave-server starting");

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("weave-server ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining in-flight requests");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique() {
        let state = ServerState::new(ComposerConfig::default(), PathBuf::from(".")).unwrap();
        let a = state.next_request_id();
        let b = state.next_request_id();
        assert_ne!(a, b);
    }
}
