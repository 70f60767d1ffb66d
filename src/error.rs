//! Error types for the screening engine

use thiserror::Error;

/// Errors raised by external collaborators (universe store, market data,
/// scoring module, composition store).
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Data source unreachable or returned a malformed response
    #[error("data source unavailable: {0}")]
    Unavailable(String),

    /// A requested entity does not exist on the provider side
    #[error("not found: {0}")]
    NotFound(String),

    /// I/O error (file-backed providers)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error (strategy parameter passthrough)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for provider-specific failures
    #[error("provider error: {0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Fatal errors that abort a screening run before any write.
///
/// Per-candidate failures are never surfaced here; they are recorded as
/// diagnostic state on the candidate and flow through the normal filters.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid index configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The universe query failed; nothing can be screened
    #[error("universe query failed: {0}")]
    Universe(#[source] ProviderError),

    /// A whole enrichment phase failed (no prices at all, etc.)
    #[error("enrichment phase failed: {0}")]
    Enrichment(#[source] ProviderError),

    /// The configured ranking strategy could not produce a result set
    #[error("ranking strategy '{strategy}' failed: {source}")]
    Strategy {
        strategy: String,
        #[source]
        source: ProviderError,
    },

    /// Reading or replacing the persisted composition failed
    #[error("composition store error: {0}")]
    Store(#[source] ProviderError),
}
