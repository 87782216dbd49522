//! Filesystem-backed template resolution.
//!
//! Maps a request path to `<template_root>/<path>.html`, with an optional
//! sibling `<path>.child.html` used as the child template for slot
//! composition. Caching upstream template bytes is a host-side concern
//! (Design Notes' cache boundary) — this reads straight off disk, since a
//! production host would put its own cache in front of this exact call.

use std::path::{Path, PathBuf};

use anyhow::Context;
use bytes::Bytes;

use weave_core::ComposerError;

pub async fn fetch_template(template_root: &Path, request_path: &str) -> Result<(Bytes, Option<Bytes>), ComposerError> {
    let base_path = resolve_path(template_root, request_path);

    let base = tokio::fs::read(&base_path).await.map_err(|_| {
        ComposerError::template_not_found(format!("no template for {request_path}"))
    })?;

    let child_path = base_path.with_extension("child.html");
    let child = tokio::fs::read(&child_path).await.ok().map(Bytes::from);

    Ok((Bytes::from(base), child))
}

fn resolve_path(template_root: &Path, request_path: &str) -> PathBuf {
    let trimmed = request_path.trim_start_matches('/');
    let safe = if trimmed.is_empty() { "index" } else { trimmed };
    template_root.join(safe).with_extension("html")
}

/// Reads `path` into a `Bytes` buffer the way the server's own startup code
/// needs to (inlined pipe definition), wrapped with a descriptive error.
pub fn read_file(path: &str) -> anyhow::Result<Bytes> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {path}"))?;
    Ok(Bytes::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_index_for_root_path() {
        let root = PathBuf::from("/templates");
        assert_eq!(resolve_path(&root, "/"), PathBuf::from("/templates/index.html"));
    }

    #[test]
    fn resolves_nested_path() {
        let root = PathBuf::from("/templates");
        assert_eq!(resolve_path(&root, "/pages/about"), PathBuf::from("/templates/pages/about.html"));
    }
}
