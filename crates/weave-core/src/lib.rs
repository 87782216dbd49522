//! Streaming HTML fragment composer core: parses a base template plus an
//! optional child template into an ordered instruction list, schedules one
//! HTTP fetch per fragment, and assembles the results into a streamed HTTP
//! response bracketed by pipe hooks. See `render` for the two entry points
//! (`parse`, `render`) a host actually calls; everything else here is
//! public so a host can compose its own pipeline stage if it needs to.

mod assembler;
mod descriptor;
mod error;
mod fetcher;
mod host;
mod instruction;
mod link_header;
mod orchestrator;
mod parser;
mod pipe;
mod render;
mod tokenizer;
mod tracing_adapter;

pub use descriptor::{AssetEntry, AssetRel, FragmentDescriptor, DEFAULT_TIMEOUT_MS};
pub use error::{ComposerError, DecodeError, FragmentError};
pub use fetcher::{fetch_fragment, forwardable_headers, FetchOutcome, ForwardedHeaders};
pub use host::{ContextProvider, CustomTagHandler, DynamicFragment, HeaderFilter, PipeAttributes, TagStream, TemplateSource};
pub use instruction::{Instruction, ParsedTemplate, ShellState};
pub use render::{apply_context, parse, render, RenderConfig, RenderOutcome};
pub use tracing_adapter::{fragment_span, record_fragment_error, record_server_outcome, server_span};
