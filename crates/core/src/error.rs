//! Unified error types for offcache.
//!
//! Display strings carry a stable code prefix so hosts can match on them
//! without parsing the free-form detail.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the offline cache worker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty URL list).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Invalid or unresolvable URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// The fetch could not complete (offline, DNS, connection reset).
    #[error("NETWORK_UNAVAILABLE: {0}")]
    NetworkUnavailable(String),

    /// The fetch exceeded its time budget.
    #[error("FETCH_TIMEOUT: {0}")]
    FetchTimeout(String),

    /// Response body exceeded the configured limit.
    #[error("FETCH_TOO_LARGE: {0}")]
    FetchTooLarge(String),

    /// A manifest entry could not be fetched during install.
    #[error("MANIFEST_FETCH_FAILED: {url}: {reason}")]
    ManifestFetchFailure { url: String, reason: String },

    /// No generation with the given id exists.
    #[error("GENERATION_NOT_FOUND: {0}")]
    GenerationNotFound(String),

    /// The generation is in a state that does not allow the operation.
    #[error("GENERATION_STATE: {id} is {state}")]
    GenerationState { id: String, state: String },

    /// No generation is currently active.
    #[error("NO_ACTIVE_GENERATION")]
    NoActiveGeneration,

    /// Database operation failed (quota, corruption, closed connection).
    #[error("CACHE_STORE_UNAVAILABLE: {0}")]
    Database(tokio_rusqlite::Error),

    /// Stored row could not be decoded.
    #[error("CACHE_STORE_UNAVAILABLE: corrupt entry: {0}")]
    CorruptEntry(String),

    /// Migration failed to apply.
    #[error("CACHE_STORE_UNAVAILABLE: migration failed: {0}")]
    MigrationFailed(String),
}

impl Error {
    /// True for failures that mean the network could not be reached at all.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::NetworkUnavailable(_) | Error::FetchTimeout(_))
    }

    /// True for failures of the underlying cache store.
    pub fn is_store(&self) -> bool {
        matches!(self, Error::Database(_) | Error::CorruptEntry(_) | Error::MigrationFailed(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::CorruptEntry(err.to_string())
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::InvalidInput(_) => -32602,
            Error::InvalidUrl(_) => -32003,
            Error::NetworkUnavailable(_) => -32004,
            Error::FetchTimeout(_) => -32006,
            Error::FetchTooLarge(_) => -32007,
            Error::ManifestFetchFailure { .. } => -32008,
            Error::GenerationNotFound(_) => -32009,
            Error::GenerationState { .. } => -32010,
            Error::NoActiveGeneration => -32011,
            Error::Database(_) | Error::CorruptEntry(_) | Error::MigrationFailed(_) => -32002,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}
