//! Fragment descriptors and Link-header asset entries — the data model
//! shared by the parser, fetcher and orchestrator.

use std::collections::BTreeMap;

/// Default per-fragment fetch timeout when the tag omits `timeout`.
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// A fragment placeholder as produced by the template parser.
///
/// `id` defaults to the fragment's own parser-emission `index` (stringified)
/// when the tag carries no explicit `id` attribute. The parsed template is
/// never mutated in place: context overrides are applied by cloning a
/// descriptor and patching the clone (see [`crate::render::apply_context`]).
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentDescriptor {
    /// Parser-emission order index. Used as the default `id` and to derive
    /// the pipe index reservation.
    pub index: usize,
    pub id: String,
    pub src: Option<String>,
    pub fallback_src: Option<String>,
    pub primary: bool,
    pub is_async: bool,
    pub public: bool,
    pub timeout_ms: u64,
    /// First pipe index reserved for this fragment by the planner.
    pub pipe_lo: usize,
    /// Raw tag attributes, for `pipeAttributes`/custom-tag delegation.
    pub attrs: BTreeMap<String, String>,
}

impl FragmentDescriptor {
    pub fn from_attrs(index: usize, pipe_lo: usize, attrs: &[(String, String)]) -> Self {
        let map: BTreeMap<String, String> = attrs.iter().cloned().collect();

        let id = map.get("id").cloned().unwrap_or_else(|| index.to_string());
        let src = map.get("src").cloned();
        let fallback_src = map.get("fallback-src").cloned();
        let primary = parse_bool_attr(&map, "primary");
        let is_async = parse_bool_attr(&map, "async");
        let public = parse_bool_attr(&map, "public");
        let timeout_ms = map
            .get("timeout")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        Self {
            index,
            id,
            src,
            fallback_src,
            primary,
            is_async,
            public,
            timeout_ms,
            pipe_lo,
            attrs: map,
        }
    }

    /// Applies a context override (`contextOverrides[id]`) without mutating
    /// the template this descriptor came from — the caller always holds the
    /// original and this produces a new, patched value.
    pub fn with_overrides(&self, overrides: &BTreeMap<String, String>) -> Self {
        let mut merged = self.attrs.clone();
        for (k, v) in overrides {
            merged.insert(k.clone(), v.clone());
        }
        let mut out = Self::from_attrs(self.index, self.pipe_lo, &merged.into_iter().collect::<Vec<_>>());
        out.id = overrides.get("id").cloned().unwrap_or_else(|| self.id.clone());
        // `from_attrs` only knows the hard-coded fallback; if neither the
        // original tag nor this override named `timeout`, keep whatever
        // default was already resolved (e.g. the host's configured one)
        // instead of silently reverting to it.
        if !out.attrs.contains_key("timeout") {
            out.timeout_ms = self.timeout_ms;
        }
        out
    }
}

fn parse_bool_attr(attrs: &BTreeMap<String, String>, name: &str) -> bool {
    match attrs.get(name) {
        None => false,
        Some(v) if v.is_empty() || v.eq_ignore_ascii_case("true") => true,
        Some(v) if v.eq_ignore_ascii_case("false") => false,
        Some(_) => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetRel {
    Stylesheet,
    FragmentScript,
}

/// A single entry parsed out of a fragment response's `Link` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    pub href: String,
    pub rel: AssetRel,
    pub crossorigin: bool,
}

/// Number of pipe indices a fragment with `extra_script_count` discovered
/// `fragment-script` assets actually uses, capped by `max_asset_links` and
/// never less than 1 (the fragment's own start/end pair).
pub fn asset_index_count(max_asset_links: usize, extra_script_count: usize) -> usize {
    max_asset_links.max(1).min(extra_script_count).max(1)
}

/// The `[lo, hi]` span actually rendered for a fragment, given the indices
/// the planner reserved starting at `lo` and the assets discovered after
/// fetch. `hi - lo` may be smaller than the planner's worst-case reservation
/// when fewer fragment-script assets were found than `max_asset_links`
/// allows — those unused trailing indices become permanent gaps.
pub fn index_range(lo: usize, max_asset_links: usize, extra_script_count: usize) -> (usize, usize) {
    let count = asset_index_count(max_asset_links, extra_script_count);
    (lo, lo + count - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_id_is_index() {
        let d = FragmentDescriptor::from_attrs(3, 3, &[("src".into(), "https://a".into())]);
        assert_eq!(d.id, "3");
    }

    #[test]
    fn explicit_id_wins() {
        let d = FragmentDescriptor::from_attrs(
            3,
            3,
            &[("src".into(), "https://a".into()), ("id".into(), "header".into())],
        );
        assert_eq!(d.id, "header");
    }

    #[test]
    fn bool_attrs_and_timeout() {
        let d = FragmentDescriptor::from_attrs(
            0,
            0,
            &[
                ("src".into(), "https://a".into()),
                ("primary".into(), String::new()),
                ("async".into(), "true".into()),
                ("public".into(), "false".into()),
                ("timeout".into(), "150".into()),
            ],
        );
        assert!(d.primary);
        assert!(d.is_async);
        assert!(!d.public);
        assert_eq!(d.timeout_ms, 150);
    }

    #[test]
    fn default_timeout() {
        let d = FragmentDescriptor::from_attrs(0, 0, &[("src".into(), "https://a".into())]);
        assert_eq!(d.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn index_range_caps_at_max_asset_links() {
        assert_eq!(index_range(0, 3, 3), (0, 2));
        assert_eq!(index_range(0, 1, 0), (0, 0));
        assert_eq!(index_range(5, 3, 1), (5, 5));
    }
}
