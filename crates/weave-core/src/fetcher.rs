//! One HTTP call per fragment: header forwarding, timeout, gzip decode and
//! fallback retry.

use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};

use crate::descriptor::FragmentDescriptor;
use crate::error::{DecodeError, FragmentError};

/// Request headers forwarded to the upstream fragment, already passed
/// through [`forwardable_headers`] for a specific descriptor.
pub type ForwardedHeaders = Vec<(String, String)>;

/// What a successful fetch hands back to the orchestrator: everything it
/// needs to write the region's opening pipe hook (status, discovered
/// assets) plus a body stream it can pipe straight to the client.
pub struct FetchOutcome {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: std::pin::Pin<Box<dyn Stream<Item = Result<Bytes, FragmentError>> + Send>>,
}

/// Headers always forwarded to upstream fragments, plus the `x-*` wildcard
/// from §4.3 (excluding the implementation-specific block list).
const ALWAYS_FORWARDED: &[&str] = &["referer", "accept-language", "user-agent"];
const NEVER_FORWARDED_X_HEADERS: &[&str] = &["x-wrong-header"];

/// Filters the incoming request's headers down to the set forwarded to a
/// fragment upstream. `cookie`/`authorization` only pass through when the
/// descriptor is `public`.
pub fn forwardable_headers(incoming: &[(String, String)], descriptor: &FragmentDescriptor) -> ForwardedHeaders {
    incoming
        .iter()
        .filter(|(name, _)| {
            let lower = name.to_ascii_lowercase();
            if lower == "cookie" || lower == "authorization" {
                return descriptor.public;
            }
            if ALWAYS_FORWARDED.contains(&lower.as_str()) {
                return true;
            }
            if lower.starts_with("x-") {
                return !NEVER_FORWARDED_X_HEADERS.contains(&lower.as_str());
            }
            false
        })
        .cloned()
        .collect()
}

/// Fetches one fragment, retrying against `fallback_src` on failure per the
/// contract in §4.3. `request_id` is forwarded as `x-request-id` alongside
/// the allowlisted headers (see §10.6).
pub async fn fetch_fragment(
    client: &reqwest::Client,
    descriptor: &FragmentDescriptor,
    headers: &ForwardedHeaders,
    request_id: &str,
) -> Result<FetchOutcome, FragmentError> {
    let Some(src) = descriptor.src.as_deref() else {
        return Err(FragmentError::FetchError("fragment has no src".to_string()));
    };

    match fetch_once(client, src, headers, request_id, descriptor.timeout_ms).await {
        Ok(outcome) => Ok(outcome),
        Err(primary_err) => match descriptor.fallback_src.as_deref() {
            Some(fallback) => fetch_once(client, fallback, headers, request_id, descriptor.timeout_ms).await,
            None => Err(primary_err),
        },
    }
}

async fn fetch_once(
    client: &reqwest::Client,
    url: &str,
    headers: &ForwardedHeaders,
    request_id: &str,
    timeout_ms: u64,
) -> Result<FetchOutcome, FragmentError> {
    let mut req = client.get(url).timeout(Duration::from_millis(timeout_ms));
    for (name, value) in headers {
        req = req.header(name, value);
    }
    req = req.header("x-request-id", request_id);

    let resp = req.send().await.map_err(|e| {
        if e.is_timeout() {
            FragmentError::Timeout { timeout_ms }
        } else {
            FragmentError::FetchError(e.to_string())
        }
    })?;

    let status = resp.status().as_u16();
    if let Some(err) = FragmentError::from_status(status) {
        return Err(err);
    }

    let headers: Vec<(String, String)> = resp
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect();
    let gzipped = headers
        .iter()
        .any(|(k, v)| k.eq_ignore_ascii_case("content-encoding") && v.eq_ignore_ascii_case("gzip"));

    let raw = resp.bytes_stream().map_err(|e| FragmentError::FetchError(e.to_string()));
    let body = if gzipped {
        decode_gzip_stream(raw)
    } else {
        Box::pin(raw)
    };

    Ok(FetchOutcome { status, headers, body })
}

/// Wraps a byte stream in a streaming gzip decoder. Decode errors degrade
/// to a clean end-of-stream (empty remainder) rather than propagating, per
/// §4.3/§7: the client connection is never terminated by a decode failure.
fn decode_gzip_stream(
    raw: impl Stream<Item = Result<Bytes, FragmentError>> + Send + 'static,
) -> std::pin::Pin<Box<dyn Stream<Item = Result<Bytes, FragmentError>> + Send>> {
    use async_compression::tokio::bufread::GzipDecoder;
    use tokio_util::io::{ReaderStream, StreamReader};

    let as_io = raw.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
    let reader = tokio::io::BufReader::new(StreamReader::new(as_io));
    let decoder = GzipDecoder::new(reader);
    let decoded = ReaderStream::new(decoder).map(|chunk| match chunk {
        Ok(bytes) => Ok(bytes),
        Err(e) => {
            tracing::warn!(error = %e, "gzip decode error, ending fragment body early");
            Err(FragmentError::FetchError(DecodeError(e.to_string()).to_string()))
        }
    });
    // A decode error surfaces as a stream item error; callers that only
    // care about "did we get bytes" should treat this the same as a clean
    // EOF (see `assembler::collect_body_best_effort`).
    Box::pin(decoded)
}
