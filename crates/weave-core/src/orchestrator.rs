//! Per-fragment fetch scheduling.
//!
//! Every fragment's HTTP request is started the moment the parser's
//! instruction list is available (eager scheduling, §4.4/§5) via
//! `tokio::spawn`; the assembler decides *when* to consume each result —
//! strictly in document order for sync fragments, in completion order for
//! the drain queue.
//!
//! ```text
//! INIT → FETCHING → (STREAMING | FALLBACK_FETCHING | FAILED)
//! FALLBACK_FETCHING → (STREAMING | FAILED)
//! STREAMING → DONE
//! ```
//! The fallback retry (`FETCHING → FALLBACK_FETCHING`) lives inside
//! [`crate::fetcher::fetch_fragment`] itself; everything past that point is
//! just "did we get an outcome or not", which is all the assembler needs.

use tokio::task::JoinHandle;

use crate::descriptor::FragmentDescriptor;
use crate::error::FragmentError;
use crate::fetcher::{self, FetchOutcome};
use crate::instruction::Instruction;
use crate::tracing_adapter;

/// A fragment whose fetch has been started but whose outcome may not have
/// been consumed yet.
pub struct FragmentSlot {
    pub descriptor: FragmentDescriptor,
    pub is_async: bool,
    handle: Option<JoinHandle<Result<FetchOutcome, FragmentError>>>,
    cached: Option<Result<FetchOutcome, FragmentError>>,
}

impl FragmentSlot {
    /// Awaits the fetch exactly once, caching the outcome so it can be
    /// read again later without re-awaiting a consumed `JoinHandle` — the
    /// primary fragment needs its headers early (to set the outer response
    /// status) and its body again later, at its ordinary document position.
    pub async fn resolve(&mut self) -> &Result<FetchOutcome, FragmentError> {
        if self.cached.is_none() {
            let handle = self.handle.take().expect("resolve() called after outcome already taken");
            let result = handle.await.unwrap_or_else(|e| Err(FragmentError::FetchError(e.to_string())));
            self.cached = Some(result);
        }
        self.cached.as_ref().expect("just populated above")
    }

    /// Resolves (if needed) and takes ownership of the outcome — used the
    /// one time a fragment's body is actually streamed out.
    pub async fn take_resolved(&mut self) -> Result<FetchOutcome, FragmentError> {
        self.resolve().await;
        self.cached.take().expect("resolve() always populates cached")
    }

    /// Peeks at an already-resolved, not-yet-taken outcome without
    /// consuming it. Returns `None` if `resolve()` hasn't run yet.
    pub fn peek_cached(&self) -> Option<&Result<FetchOutcome, FragmentError>> {
        self.cached.as_ref()
    }
}

/// Starts every fragment fetch named in `instructions`, in document order.
/// Dynamic fragments discovered later (from a custom-tag stream) are
/// scheduled separately via [`schedule_one`] as they arrive.
///
/// `candidate_headers` is the incoming request's headers, unfiltered —
/// each fragment's own `public` flag decides whether `cookie`/`authorization`
/// make it through, so the allowlist in [`fetcher::forwardable_headers`]
/// must run per descriptor, not once for the whole template.
pub fn schedule_all(
    instructions: &[Instruction],
    client: &reqwest::Client,
    candidate_headers: &[(String, String)],
    request_id: &str,
) -> Vec<FragmentSlot> {
    instructions
        .iter()
        .filter_map(|instr| match instr {
            Instruction::Fragment(d) => Some((d.clone(), false)),
            Instruction::AsyncPlaceholder(d) => Some((d.clone(), true)),
            _ => None,
        })
        .map(|(descriptor, is_async)| schedule_one(descriptor, is_async, client, candidate_headers, request_id))
        .collect()
}

pub fn schedule_one(
    descriptor: FragmentDescriptor,
    is_async: bool,
    client: &reqwest::Client,
    candidate_headers: &[(String, String)],
    request_id: &str,
) -> FragmentSlot {
    let client = client.clone();
    let headers = fetcher::forwardable_headers(candidate_headers, &descriptor);
    let request_id = request_id.to_string();
    let d = descriptor.clone();
    let handle = tokio::spawn(async move {
        use tracing::Instrument;
        let span = tracing_adapter::fragment_span(&d);
        let result = fetcher::fetch_fragment(&client, &d, &headers, &request_id)
            .instrument(span.clone())
            .await;
        if let Err(err) = &result {
            tracing_adapter::record_fragment_error(&span, err);
        }
        result
    });
    FragmentSlot { descriptor, is_async, handle: Some(handle), cached: None }
}
