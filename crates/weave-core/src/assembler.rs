//! Output stream assembler (§4.5): writes the shell, in-order sync-fragment
//! regions, and the async drain queue, bracketed by pipe hooks.

use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::Stream;

use crate::descriptor::FragmentDescriptor;
use crate::error::FragmentError;
use crate::fetcher::FetchOutcome;
use crate::host::{CustomTagHandler, HeaderFilter};
use crate::instruction::{Instruction, ParsedTemplate};
use crate::link_header;
use crate::orchestrator::{schedule_one, FragmentSlot};
use crate::pipe;

use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything the assembler needs that isn't already in the parsed
/// template or the fragment slots themselves.
#[derive(Clone)]
pub struct RenderConfig {
    pub pipe_instance_name: String,
    pub amd_loader_url: Option<String>,
    pub pipe_definition: Option<Bytes>,
    pub max_asset_links: usize,
    pub request_host: String,
    pub client_is_cross_origin_to_loader: bool,
    pub client: reqwest::Client,
    pub request_id: String,
    pub tag_handler: Option<Arc<dyn CustomTagHandler>>,
    pub header_filter: Option<Arc<dyn HeaderFilter>>,
}

pub struct RenderOutcome {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>,
}

const PROPAGATED_HEADERS: &[&str] = &["location", "set-cookie"];

/// Drives the parsed template to completion: resolves the primary
/// fragment's headers (blocking the response's status/headers on it, per
/// §4.4), then returns a lazily-evaluated body stream for everything else.
pub async fn render(
    template: ParsedTemplate,
    candidate_headers: Vec<(String, String)>,
    cfg: RenderConfig,
) -> RenderOutcome {
    let all_instrs: Vec<Instruction> =
        template.head.iter().chain(template.body.iter()).cloned().collect();
    let mut slots = crate::orchestrator::schedule_all(&all_instrs, &cfg.client, &candidate_headers, &cfg.request_id);

    let primary_pos = slots.iter().position(|s| s.descriptor.primary);

    let (status, mut outer_headers) = match primary_pos {
        None => (200u16, Vec::new()),
        Some(i) => match slots[i].resolve().await {
            Ok(outcome) => {
                let filtered = filter_headers(&cfg, &slots[i].descriptor.attrs, outcome.headers.clone());
                let propagated = filtered
                    .iter()
                    .filter(|(k, _)| PROPAGATED_HEADERS.contains(&k.to_ascii_lowercase().as_str()))
                    .cloned()
                    .collect();
                (outcome.status, propagated)
            }
            Err(err) => {
                tracing::error!(%err, "primary fragment failed before any bytes were written");
                return RenderOutcome {
                    status: 500,
                    headers: Vec::new(),
                    body: Box::pin(futures_util::stream::once(async { Ok(Bytes::new()) })),
                };
            }
        },
    };

    outer_headers.push(("Cache-Control".to_string(), "no-cache, no-store, must-revalidate".to_string()));
    outer_headers.push(("Pragma".to_string(), "no-cache".to_string()));
    if let Some(link) = preload_link_header(&cfg, primary_pos.map(|i| &slots[i])) {
        outer_headers.push(("Link".to_string(), link));
    }

    let body = build_body_stream(template, slots, candidate_headers, cfg);
    RenderOutcome { status, headers: outer_headers, body }
}

/// Builds the `Link: rel=preload` header (§4.5), omitted entirely when the
/// pipe runtime is inlined rather than loaded from an external URL.
fn preload_link_header(cfg: &RenderConfig, primary: Option<&FragmentSlot>) -> Option<String> {
    let amd_url = cfg.pipe_definition.is_none().then(|| cfg.amd_loader_url.as_deref()).flatten()?;

    let mut parts = vec![format!(
        "<{amd_url}>; rel=preload; as=script; nopush{}",
        if cfg.client_is_cross_origin_to_loader { "; crossorigin" } else { "" }
    )];

    if let Some(slot) = primary {
        if let Some(Ok(outcome)) = slot.peek_cached() {
            let headers = filter_headers(cfg, &slot.descriptor.attrs, outcome.headers.clone());
            if let Some(link_value) = link_header::pick_link_header(headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))) {
                for asset in link_header::parse(&link_value, &cfg.request_host, cfg.max_asset_links) {
                    let as_kind = match asset.rel {
                        crate::descriptor::AssetRel::Stylesheet => "style",
                        crate::descriptor::AssetRel::FragmentScript => "script",
                    };
                    let cross = if asset.crossorigin { "; crossorigin" } else { "" };
                    parts.push(format!("<{}>; rel=preload; as={as_kind}{cross}", asset.href));
                }
            }
        }
    }

    Some(parts.join(", "))
}

fn build_body_stream(
    template: ParsedTemplate,
    slots: Vec<FragmentSlot>,
    candidate_headers: Vec<(String, String)>,
    cfg: RenderConfig,
) -> Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>> {
    let mut by_index: BTreeMap<usize, FragmentSlot> = slots.into_iter().map(|s| (s.descriptor.index, s)).collect();

    Box::pin(async_stream::stream! {
        yield Ok(Bytes::from_static(b"<html><head>"));
        for instr in &template.head {
            for chunk in render_head_instr(instr, &mut by_index, &cfg).await {
                yield Ok(chunk);
            }
        }
        if let Some(preamble) = runtime_preamble(&cfg) {
            yield Ok(preamble);
        }
        yield Ok(Bytes::from_static(b"</head><body>"));

        let mut drain = FuturesUnordered::new();
        for instr in &template.body {
            match instr {
                Instruction::AsyncPlaceholder(d) => {
                    yield Ok(pipe_placeholder_bytes(&cfg, d));
                    if let Some(mut slot) = by_index.remove(&d.index) {
                        drain.push(async move {
                            let outcome = slot.take_resolved().await;
                            (slot.descriptor, outcome)
                        });
                    }
                }
                Instruction::Fragment(d) => {
                    if let Some(mut slot) = by_index.remove(&d.index) {
                        for chunk in render_sync_fragment(&cfg, d, &mut slot).await {
                            yield Ok(chunk);
                        }
                    }
                }
                Instruction::CustomTag { name, attrs } => {
                    if let Some(handler) = cfg.tag_handler.clone() {
                        let mut stream = handler.handle_tag(name, attrs).await;
                        while let Some(dynamic) = stream.next().await {
                            if let Instruction::Fragment(d) | Instruction::AsyncPlaceholder(d) = dynamic.instruction {
                                let slot = schedule_one(d, true, &cfg.client, &candidate_headers, &cfg.request_id);
                                yield Ok(Bytes::from(pipe::render_placeholder(&cfg.pipe_instance_name, slot.descriptor.pipe_lo, &[])));
                                drain.push(async move {
                                    let mut slot = slot;
                                    let outcome = slot.take_resolved().await;
                                    (slot.descriptor, outcome)
                                });
                            }
                        }
                    }
                }
                Instruction::Literal(bytes) => yield Ok(Bytes::from(bytes.clone())),
            }
        }

        while let Some((descriptor, outcome)) = drain.next().await {
            for chunk in render_drain_fragment(&cfg, &descriptor, outcome).await {
                yield Ok(chunk);
            }
        }

        yield Ok(Bytes::from_static(b"</body></html>"));
    })
}

async fn render_head_instr(
    instr: &Instruction,
    by_index: &mut BTreeMap<usize, FragmentSlot>,
    cfg: &RenderConfig,
) -> Vec<Bytes> {
    match instr {
        Instruction::Literal(bytes) => vec![Bytes::from(bytes.clone())],
        Instruction::Fragment(d) => {
            if let Some(mut slot) = by_index.remove(&d.index) {
                render_sync_fragment(cfg, d, &mut slot).await
            } else {
                Vec::new()
            }
        }
        Instruction::AsyncPlaceholder(d) => vec![pipe_placeholder_bytes(cfg, d)],
        Instruction::CustomTag { .. } => Vec::new(),
    }
}

/// Runs a fragment's response headers through the host's [`HeaderFilter`],
/// if one is configured, before they're used for anything — asset
/// discovery, primary propagation, or the client at all.
fn filter_headers(cfg: &RenderConfig, attrs: &BTreeMap<String, String>, headers: Vec<(String, String)>) -> Vec<(String, String)> {
    match &cfg.header_filter {
        Some(filter) => filter.filter_response_headers(attrs, headers),
        None => headers,
    }
}

fn pipe_placeholder_bytes(cfg: &RenderConfig, d: &FragmentDescriptor) -> Bytes {
    Bytes::from(pipe::render_placeholder(&cfg.pipe_instance_name, d.pipe_lo, &[]))
}

async fn render_sync_fragment(cfg: &RenderConfig, d: &FragmentDescriptor, slot: &mut FragmentSlot) -> Vec<Bytes> {
    let outcome = slot.take_resolved().await;
    render_fragment_region(cfg, d, outcome).await
}

async fn render_drain_fragment(cfg: &RenderConfig, d: &FragmentDescriptor, outcome: Result<FetchOutcome, FragmentError>) -> Vec<Bytes> {
    render_fragment_region(cfg, d, outcome).await
}

/// Renders one fragment's bracketed region: `p.start(...)`, body (empty on
/// failure — non-primary failures are swallowed per §7), `p.end(...)`.
async fn render_fragment_region(cfg: &RenderConfig, d: &FragmentDescriptor, outcome: Result<FetchOutcome, FragmentError>) -> Vec<Bytes> {
    let assets = match &outcome {
        Ok(o) => {
            let headers = filter_headers(cfg, &d.attrs, o.headers.clone());
            link_header::pick_link_header(headers.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .map(|v| link_header::parse(&v, &cfg.request_host, cfg.max_asset_links))
                .unwrap_or_default()
        }
        Err(_) => Vec::new(),
    };
    let mut out = Vec::new();
    out.push(Bytes::from(pipe::render_start(&cfg.pipe_instance_name, d, &assets, cfg.max_asset_links)));

    let body_bytes = match outcome {
        Ok(o) => collect_body_best_effort(o.body).await,
        Err(_) => Bytes::new(),
    };
    out.push(body_bytes);
    out.push(Bytes::from(pipe::render_end(&cfg.pipe_instance_name, d, &assets, cfg.max_asset_links)));
    out
}

/// Drains a fragment's body stream into one buffer. A mid-stream error
/// (e.g. a gzip decode failure) truncates the body rather than failing the
/// whole response, matching §4.3/§7's "decoder errors terminate the stream
/// cleanly" rule.
async fn collect_body_best_effort(mut body: Pin<Box<dyn Stream<Item = Result<Bytes, FragmentError>> + Send>>) -> Bytes {
    let mut out = Vec::new();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => out.extend_from_slice(&bytes),
            Err(_) => break,
        }
    }
    Bytes::from(out)
}

fn runtime_preamble(cfg: &RenderConfig) -> Option<Bytes> {
    let mut out = Vec::new();
    if let Some(url) = &cfg.amd_loader_url {
        if cfg.pipe_definition.is_none() {
            out.extend_from_slice(format!("<script src=\"{url}\"></script>").as_bytes());
        }
    }
    if let Some(def) = &cfg.pipe_definition {
        out.extend_from_slice(format!("<script>var {}=(function(){{", cfg.pipe_instance_name).as_bytes());
        out.extend_from_slice(def);
        out.extend_from_slice(b"})();</script>");
    }
    if out.is_empty() {
        None
    } else {
        Some(Bytes::from(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::ShellState;

    fn cfg() -> RenderConfig {
        RenderConfig {
            pipe_instance_name: "p".to_string(),
            amd_loader_url: None,
            pipe_definition: None,
            max_asset_links: 1,
            request_host: "example.com".to_string(),
            client_is_cross_origin_to_loader: false,
            client: reqwest::Client::new(),
            request_id: "req-1".to_string(),
            tag_handler: None,
            header_filter: None,
        }
    }

    #[tokio::test]
    async fn empty_template_renders_bare_shell() {
        let template = ParsedTemplate { head: vec![], body: vec![], shell: ShellState::default(), warnings: vec![] };
        let outcome = render(template, Vec::new(), cfg()).await;
        assert_eq!(outcome.status, 200);
        let mut body = outcome.body;
        let mut collected = Vec::new();
        while let Some(chunk) = body.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"<html><head></head><body></body></html>");
    }
}
