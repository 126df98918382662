//! Error taxonomy for the retrieval engine.
//!
//! Errors fall into two camps: fatal configuration mistakes the caller must
//! fix ([`ConfigurationError`]), and transient backend failures
//! ([`EmbeddingError`], [`StoreUnavailableError`]) that are retried with
//! bounded backoff before being surfaced as a terminal
//! [`RetrievalError`] or [`IngestionError`].
//!
//! Empty results are never modeled as errors: a query that resolves no
//! entity or matches no chunks is a valid outcome with defined downstream
//! behavior (unscoped search, general-knowledge prompt).
//!
//! Every surfaced error exposes a stable [`kind`](RetrievalError::kind)
//! string and a human-readable cause. Messages never carry backend
//! internals such as connection strings or driver-level detail.

use thiserror::Error;

/// Invalid chunking or budget parameters.
///
/// Fatal: never retried, the caller must fix its configuration.
#[derive(Debug, Clone, Error)]
#[error("invalid configuration: {message}")]
pub struct ConfigurationError {
    pub message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        "configuration"
    }
}

/// Embedding backend failure.
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    /// The backend could not be reached or returned a non-success status.
    #[error("embedding backend failure: {0}")]
    Backend(String),

    /// The input cannot be embedded (e.g. empty text).
    #[error("malformed embedding input: {0}")]
    MalformedInput(String),

    /// The backend responded, but the payload did not match the expected
    /// shape (missing vectors, wrong dimensionality, wrong count).
    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),
}

impl EmbeddingError {
    pub fn kind(&self) -> &'static str {
        "embedding"
    }

    /// Whether retrying the same call can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbeddingError::Backend(_))
    }
}

/// The vector store or company directory cannot be reached.
///
/// Callers retry with bounded exponential backoff (see
/// [`RetryPolicy`](crate::config::RetryPolicy)) before surfacing this as a
/// [`RetrievalError`] or [`IngestionError`].
#[derive(Debug, Clone, Error)]
#[error("store unavailable: {cause}")]
pub struct StoreUnavailableError {
    pub cause: String,
}

impl StoreUnavailableError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        "store_unavailable"
    }
}

/// Terminal failure of a retrieval attempt.
///
/// Only produced after the retry policy is exhausted; a retrieval that
/// simply finds zero chunks is not an error.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding failed after {attempts} attempt(s): {source}")]
    Embedding {
        attempts: u32,
        source: EmbeddingError,
    },

    #[error("store unreachable after {attempts} attempt(s): {source}")]
    Store {
        attempts: u32,
        source: StoreUnavailableError,
    },
}

impl RetrievalError {
    pub fn kind(&self) -> &'static str {
        "retrieval"
    }
}

/// Terminal failure of an ingestion attempt.
///
/// The all-or-nothing contract holds: when this is returned, no partial
/// revision has been committed to the store.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error(transparent)]
    Config(#[from] ConfigurationError),

    #[error("embedding failed after {attempts} attempt(s): {source}")]
    Embedding {
        attempts: u32,
        source: EmbeddingError,
    },

    #[error("store unreachable after {attempts} attempt(s): {source}")]
    Store {
        attempts: u32,
        source: StoreUnavailableError,
    },
}

impl IngestionError {
    pub fn kind(&self) -> &'static str {
        "ingestion"
    }
}
