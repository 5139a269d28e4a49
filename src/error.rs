//! Error types
//!
//! Two failure classes exist in this crate: configuration errors, which are
//! fatal and raised when a pipeline is built or reloaded, and storage errors,
//! which surface from `finalize` after the client response has already been
//! computed. Everything else (missing enriched request, unauthenticated user,
//! non-mapping bodies) degrades to empty defaults and is never an error.

use thiserror::Error;

/// Convenience result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the request logging pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration: bad ignore-path pattern, invalid header name,
    /// or a failed configuration extraction. Raised at build/reload time,
    /// never deferred to request time.
    #[error("configuration error: {0}")]
    Config(String),

    /// The storage backend rejected a finished record. The middleware reports
    /// this at `error` level; the client response is unaffected.
    #[error("storage backend failure: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Wrap a backend error as a storage failure
    pub fn storage(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Storage(Box::new(source))
    }
}
