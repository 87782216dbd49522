//! Thin `tracing::Span`-producing adapter satisfying §4.7's span contract.
//!
//! "OpenTracing-compatible tracer" in the distilled design is realized here
//! as "produces `tracing` spans carrying the named fields"; a host that
//! wants a real OpenTracing/OpenTelemetry exporter attaches a subscriber
//! layer outside this crate. Tracing is best-effort: nothing in here can
//! fail the response.

use tracing::Span;

use crate::descriptor::FragmentDescriptor;
use crate::error::FragmentError;

/// One span per inbound request. `http.url` and `request_id` are recorded
/// as fields up front; `record_outcome` fills in the terminal status once
/// known.
pub fn server_span(url: &str, request_id: &str) -> Span {
    tracing::info_span!(
        "composer.request",
        otel.kind = "server",
        http.url = %url,
        request_id = %request_id,
        http.status_code = tracing::field::Empty,
        error = tracing::field::Empty,
    )
}

pub fn record_server_outcome(span: &Span, status: u16) {
    span.record("http.status_code", status);
    if status >= 500 {
        span.record("error", true);
    }
}

/// One span per fragment fetch, tagged with the fields §4.7 names.
pub fn fragment_span(descriptor: &FragmentDescriptor) -> Span {
    tracing::debug_span!(
        "composer.fragment_fetch",
        otel.kind = "client",
        http.url = descriptor.src.as_deref().unwrap_or(""),
        id = %descriptor.id,
        primary = descriptor.primary,
        r#async = descriptor.is_async,
        public = descriptor.public,
        fallback = descriptor.fallback_src.is_some(),
        timeout_ms = descriptor.timeout_ms,
        error = tracing::field::Empty,
    )
}

/// Records a fragment's terminal failure on its span. Called from inside
/// the span (i.e. after `.enter()` or within an instrumented future) so the
/// event attaches to the right span.
pub fn record_fragment_error(span: &Span, err: &FragmentError) {
    span.record("error", true);
    tracing::warn!(parent: span, kind = err.kind(), %err, "fragment fetch failed");
}
