//! Error taxonomy for the retrieval-and-answer pipeline.
//!
//! Malformed knowledge-base blocks and empty retrievals are recovered
//! locally (a warning and a fallback answer respectively) and never
//! surface here. Everything in [`RagError`] propagates to the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// The request was rejected before retrieval (e.g. an empty question).
    #[error("invalid request: {0}")]
    Validation(String),

    /// The semantic index could not be built at startup.
    #[error("index build failed: {0}")]
    IndexBuild(String),

    /// An embedding or generation call failed or timed out.
    #[error("{backend} backend unavailable: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },

    /// The interaction log or vector cache could not be read or written.
    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl RagError {
    pub(crate) fn backend(backend: &'static str, reason: impl Into<String>) -> Self {
        RagError::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    /// Maps a transport error, distinguishing timeouts in the message.
    pub(crate) fn from_http(backend: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RagError::backend(backend, format!("request timed out: {}", err))
        } else {
            RagError::backend(backend, err.to_string())
        }
    }
}

pub type RagResult<T> = std::result::Result<T, RagError>;
