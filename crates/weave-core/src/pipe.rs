//! Pipe-asset planner and pipe-hook rendering.
//!
//! The planner assigns each fragment a dense block of pipe indices at
//! parse time, before any fetch has happened, so an async fragment's inline
//! placeholder and its eventual drained body agree on the same index. Per
//! fragment it reserves the *worst case* span — `max_asset_links` slots —
//! since the actual `fragment-script` count is only known once the
//! response's `Link` header has been read; unused trailing indices become
//! permanent gaps in the global sequence (see `descriptor::index_range`).

use crate::descriptor::{AssetEntry, AssetRel, FragmentDescriptor};

#[derive(Debug, Default)]
pub struct PipePlanner {
    max_asset_links: usize,
    next_index: usize,
}

impl PipePlanner {
    pub fn new(max_asset_links: usize) -> Self {
        Self {
            max_asset_links: max_asset_links.max(1),
            next_index: 0,
        }
    }

    /// Reserves and returns the `lo` index for the next fragment in
    /// parser-emission order. Must be called exactly once per fragment, in
    /// order.
    pub fn reserve(&mut self) -> usize {
        let lo = self.next_index;
        self.next_index += self.max_asset_links;
        lo
    }

    pub fn max_asset_links(&self) -> usize {
        self.max_asset_links
    }
}

/// Builds the literal `{"id":…,"range":[lo,hi]}` JSON object used as the
/// third argument to `p.start`. Key order is significant: tests assert the
/// literal bytes, so this is hand-serialized rather than routed through a
/// generic map (which wouldn't guarantee ordering).
pub fn attrs_json(id: &str, lo: usize, hi: usize) -> String {
    let id_value = match id.parse::<i64>() {
        Ok(n) => n.to_string(),
        Err(_) => serde_json::to_string(id).unwrap_or_else(|_| "null".to_string()),
    };
    format!("{{\"id\":{id_value},\"range\":[{lo},{hi}]}}")
}

/// Renders the opening `p.start(...)` calls for a fragment's region, from
/// outermost (index `lo`) to innermost (index `hi`), one nested
/// `<script data-pipe>` per reserved index actually in use.
pub fn render_start(
    pipe_name: &str,
    descriptor: &FragmentDescriptor,
    assets: &[AssetEntry],
    max_asset_links: usize,
) -> String {
    let scripts: Vec<&AssetEntry> = assets.iter().filter(|a| a.rel == AssetRel::FragmentScript).collect();
    let (lo, hi) = crate::descriptor::index_range(descriptor.pipe_lo, max_asset_links, scripts.len());

    let mut out = String::new();
    if scripts.is_empty() {
        out.push_str(&format!("<script data-pipe>{pipe_name}.start({lo})</script>"));
    } else {
        for (offset, asset) in scripts.iter().take(hi - lo + 1).enumerate() {
            let idx = lo + offset;
            let json = attrs_json(&descriptor.id, lo, hi);
            out.push_str(&format!(
                "<script data-pipe>{pipe_name}.start({idx}, \"{}\", {json})</script>",
                asset.href
            ));
        }
    }
    out
}

/// Renders the closing `p.end(...)` calls, in reverse index order (`hi`
/// down to `lo`), mirroring `render_start`.
pub fn render_end(pipe_name: &str, descriptor: &FragmentDescriptor, assets: &[AssetEntry], max_asset_links: usize) -> String {
    let scripts: Vec<&AssetEntry> = assets.iter().filter(|a| a.rel == AssetRel::FragmentScript).collect();
    let (lo, hi) = crate::descriptor::index_range(descriptor.pipe_lo, max_asset_links, scripts.len());

    let mut out = String::new();
    if scripts.is_empty() {
        out.push_str(&format!("<script data-pipe>{pipe_name}.end({lo})</script>"));
    } else {
        for idx in (lo..=hi).rev() {
            out.push_str(&format!("<script data-pipe>{pipe_name}.end({idx})</script>"));
        }
    }
    out
}

/// Renders an async fragment's inline region: a placeholder plus one
/// `loadCSS` call per discovered stylesheet asset. Called with an empty
/// `assets` slice if the fetch hasn't resolved yet (stylesheets simply
/// aren't known at the time the placeholder is written).
pub fn render_placeholder(pipe_name: &str, lo: usize, assets: &[AssetEntry]) -> String {
    let mut out = format!("<script data-pipe>{pipe_name}.placeholder({lo})</script>");
    for asset in assets.iter().filter(|a| a.rel == AssetRel::Stylesheet) {
        out.push_str(&format!("<script>{pipe_name}.loadCSS(\"{}\")</script>", asset.href));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FragmentDescriptor;

    fn descriptor(id: &str, lo: usize) -> FragmentDescriptor {
        FragmentDescriptor::from_attrs(lo, lo, &[("src".into(), "https://a".into()), ("id".into(), id.into())])
    }

    #[test]
    fn planner_reserves_worst_case_span() {
        let mut planner = PipePlanner::new(3);
        assert_eq!(planner.reserve(), 0);
        assert_eq!(planner.reserve(), 3);
        assert_eq!(planner.reserve(), 6);
    }

    #[test]
    fn no_asset_hooks() {
        let d = descriptor("0", 0);
        assert_eq!(render_start("p", &d, &[], 1), "<script data-pipe>p.start(0)</script>");
        assert_eq!(render_end("p", &d, &[], 1), "<script data-pipe>p.end(0)</script>");
    }

    #[test]
    fn nested_asset_hooks_reverse_on_close() {
        let d = descriptor("0", 0);
        let assets = vec![
            AssetEntry { href: "link1".into(), rel: AssetRel::FragmentScript, crossorigin: false },
            AssetEntry { href: "link2".into(), rel: AssetRel::FragmentScript, crossorigin: false },
            AssetEntry { href: "link3".into(), rel: AssetRel::FragmentScript, crossorigin: false },
        ];
        let start = render_start("p", &d, &assets, 3);
        assert_eq!(
            start,
            "<script data-pipe>p.start(0, \"link1\", {\"id\":0,\"range\":[0,2]})</script>\
<script data-pipe>p.start(1, \"link2\", {\"id\":0,\"range\":[0,2]})</script>\
<script data-pipe>p.start(2, \"link3\", {\"id\":0,\"range\":[0,2]})</script>"
        );
        let end = render_end("p", &d, &assets, 3);
        assert_eq!(
            end,
            "<script data-pipe>p.end(2)</script><script data-pipe>p.end(1)</script><script data-pipe>p.end(0)</script>"
        );
    }

    #[test]
    fn placeholder_with_stylesheets() {
        let assets = vec![AssetEntry { href: "style.css".into(), rel: AssetRel::Stylesheet, crossorigin: false }];
        assert_eq!(
            render_placeholder("p", 0, &assets),
            "<script data-pipe>p.placeholder(0)</script><script>p.loadCSS(\"style.css\")</script>"
        );
    }
}
