use thiserror::Error;

// ---------------------------------------------------------------------------
// FetchError
// ---------------------------------------------------------------------------

/// A failure reported by the backend while loading an entity or a page.
///
/// Cloneable because the same failure is stored on a cache entry and delivered
/// to every observer of that entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Entity not found: {entity_type}/{primary_key}")]
    NotFound {
        entity_type: String,
        primary_key: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend rejected request: {0}")]
    Rejected(String),

    #[error("No async runtime available to dispatch fetch")]
    NoRuntime,
}

// ---------------------------------------------------------------------------
// ActionError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("Action \"{action}\" failed: {message}")]
    Failed { action: String, message: String },

    #[error("Action transport error: {0}")]
    Transport(String),
}

// ---------------------------------------------------------------------------
// QueryError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Invalid regex: {0}")]
    InvalidRegex(String),
}

// ---------------------------------------------------------------------------
// RefCountError
// ---------------------------------------------------------------------------

/// Raised when a key is released more times than it was retained.
#[derive(Debug, Error)]
#[error("Release of cache key {key} without a matching retain")]
pub struct RefCountError {
    pub key: String,
}

// ---------------------------------------------------------------------------
// CacheError: top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    RefCount(#[from] RefCountError),

    #[error("Invalid cache configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Store has been disposed")]
    Disposed,
}

/// Convenience alias: the default error type is `CacheError`.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
