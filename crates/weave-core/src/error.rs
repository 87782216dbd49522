//! The closed error-kind sets from the error handling design: one for
//! outer-request failures (template/context/handler), one for per-fragment
//! failures that the orchestrator always swallows or collapses rather than
//! propagating raw.

use thiserror::Error;

/// An outer-request error: surfaces as the HTTP response itself.
#[derive(Debug, Clone, Error)]
pub enum ComposerError {
    #[error("{presentable}")]
    TemplateNotFound { presentable: String },
    #[error("{presentable}")]
    TemplateError { presentable: String },
}

impl ComposerError {
    pub fn status(&self) -> u16 {
        match self {
            ComposerError::TemplateNotFound { .. } => 404,
            ComposerError::TemplateError { .. } => 500,
        }
    }

    pub fn presentable(&self) -> &str {
        match self {
            ComposerError::TemplateNotFound { presentable } => presentable,
            ComposerError::TemplateError { presentable } => presentable,
        }
    }

    pub fn template_not_found(presentable: impl Into<String>) -> Self {
        ComposerError::TemplateNotFound { presentable: presentable.into() }
    }

    pub fn template_error(presentable: impl Into<String>) -> Self {
        ComposerError::TemplateError { presentable: presentable.into() }
    }
}

/// A single fragment fetch's failure. Never reaches the client directly —
/// the orchestrator turns it into a swallowed region, a fallback retry, or
/// (for an unrecoverable primary) the outer 500.
#[derive(Debug, Clone, Error)]
pub enum FragmentError {
    #[error("fragment fetch timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("fragment fetch failed: {0}")]
    FetchError(String),
    #[error("fragment upstream returned status {status}")]
    HttpError { status: u16 },
}

impl FragmentError {
    pub fn kind(&self) -> &'static str {
        match self {
            FragmentError::Timeout { .. } => "FRAGMENT_TIMEOUT",
            FragmentError::FetchError(_) => "FRAGMENT_FETCH_ERROR",
            FragmentError::HttpError { .. } => "FRAGMENT_HTTP_ERROR",
        }
    }

    /// Whether this status should be treated as a fetch failure. 2xx and
    /// 3xx are both success (a primary's 3xx additionally propagates its
    /// `Location`/status to the outer response); 4xx and 5xx are failures
    /// and trigger the fallback-retry path.
    pub fn from_status(status: u16) -> Option<Self> {
        if status >= 400 {
            Some(FragmentError::HttpError { status })
        } else {
            None
        }
    }
}

/// A gzip body failed to decode. Per spec this always degrades to an empty
/// body rather than propagating — callers log it and move on.
#[derive(Debug, Clone, Error)]
#[error("gzip decode error: {0}")]
pub struct DecodeError(pub String);
