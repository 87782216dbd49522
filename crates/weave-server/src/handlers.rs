//! Axum route handlers.

use axum::body::Body;
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::{template_source, ServerState};

/// Health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "weave-server is healthy")
}

/// The catch-all page-compose route: resolves a template for the request
/// path, parses it, and streams the assembled document back.
pub async fn compose_page(State(state): State<ServerState>, OriginalUri(uri): OriginalUri, headers: HeaderMap) -> Response {
    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| state.next_request_id());

    let span = weave_core::server_span(&uri.to_string(), &request_id);
    let _entered = span.enter();

    let (base, child) = match template_source::fetch_template(&state.template_root, uri.path()).await {
        Ok(templates) => templates,
        Err(err) => {
            tracing::warn!(%err, path = %uri.path(), "template not found");
            weave_core::record_server_outcome(&span, err.status());
            return (StatusCode::from_u16(err.status()).unwrap_or(StatusCode::NOT_FOUND), err.presentable().to_string())
                .into_response();
        }
    };

    let template = weave_core::parse(
        &base,
        child.as_deref(),
        &state.config.handled_tags,
        state.config.max_asset_links,
        state.config.upstream_timeout_ms,
    );
    for warning in &template.warnings {
        tracing::warn!(%warning, "template parse warning");
    }

    // Raw candidate headers, unfiltered — each fragment's own `public` flag
    // decides whether `cookie`/`authorization` make it through, so the
    // allowlist is applied per fragment inside the orchestrator, not here.
    let candidate_headers: Vec<(String, String)> = headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
        .collect();

    let request_host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("{}:{}", state.config.host, state.config.port));
    let loader_host = state
        .config
        .amd_loader_url
        .as_deref()
        .and_then(|url| url::Url::parse(url).ok())
        .and_then(|u| u.host_str().map(str::to_string));
    let cross_origin = loader_host.is_some_and(|loader_host| !request_host.starts_with(&loader_host));

    let cfg = weave_core::RenderConfig {
        pipe_instance_name: state.config.pipe_instance_name.clone(),
        amd_loader_url: state.config.amd_loader_url.clone(),
        pipe_definition: state.pipe_definition.clone(),
        max_asset_links: state.config.max_asset_links,
        request_host,
        client_is_cross_origin_to_loader: cross_origin,
        client: state.client.clone(),
        request_id: request_id.clone(),
        tag_handler: None,
        header_filter: None,
    };

    let outcome = weave_core::render(template, candidate_headers, cfg).await;
    weave_core::record_server_outcome(&span, outcome.status);

    let mut builder = Response::builder()
        .status(outcome.status)
        .header(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8");
    for (name, value) in outcome.headers {
        builder = builder.header(name, value);
    }

    builder.body(Body::from_stream(outcome.body)).unwrap_or_else(|err| {
        tracing::error!(%err, "failed to build response");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
    })
}
