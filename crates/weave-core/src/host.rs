//! Host extension points (§6 External Interfaces). The core never calls an
//! upstream directly for templates or context — it calls back into
//! whatever the embedding host supplies here.

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use crate::error::ComposerError;
use crate::instruction::Instruction;

/// A dynamically-produced fragment event surfaced by a custom-tag handler,
/// e.g. a delayed fragment emitted by a timer. The orchestrator appends
/// these to the drain queue as async fragments.
#[derive(Debug, Clone)]
pub struct DynamicFragment {
    pub instruction: Instruction,
}

pub type TagStream = Pin<Box<dyn Stream<Item = DynamicFragment> + Send>>;

/// Resolves the base (and optional child) template bytes for a request
/// path. Implementations typically wrap a cache in front of an upstream
/// template store; that cache lives entirely on the host side of this
/// trait (see §10.3/Design Notes' cache-boundary note).
#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn fetch_template(&self, path: &str) -> Result<(Bytes, Option<Bytes>), ComposerError>;
}

/// Resolves per-fragment attribute overrides keyed by fragment id.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn fetch_context(&self, path: &str) -> Result<BTreeMap<String, BTreeMap<String, String>>, ComposerError>;
}

/// Handles a `CustomTag` instruction, returning a stream of dynamic
/// fragment events. Default implementation yields nothing, i.e. the tag's
/// region is simply empty.
#[async_trait]
pub trait CustomTagHandler: Send + Sync {
    async fn handle_tag(&self, name: &str, attrs: &BTreeMap<String, String>) -> TagStream;
}

/// Maps a fragment's raw attributes to the object serialized into its pipe
/// hooks as the `id`/`range` JSON's sibling fields (the default
/// implementation only emits `id`/`range`, which is what §8's golden tests
/// assert; a host may widen this).
pub trait PipeAttributes: Send + Sync {
    fn attributes(&self, attrs: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let _ = attrs;
        BTreeMap::new()
    }
}

/// Lets the host post-process a fragment's response headers before any of
/// them are considered for forwarding to the outer response (primary
/// propagation) or to the client at all.
pub trait HeaderFilter: Send + Sync {
    fn filter_response_headers(
        &self,
        attrs: &BTreeMap<String, String>,
        headers: Vec<(String, String)>,
    ) -> Vec<(String, String)> {
        let _ = attrs;
        headers
    }
}
