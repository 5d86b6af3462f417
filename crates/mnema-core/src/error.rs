//! Error types surfaced to callers of the memory facade

/// Memory subsystem error
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Missing required field, illegal enum value, malformed id
    #[error("Validation error: {0}")]
    Validation(String),
    /// Target absent under the caller's scope
    #[error("Not found: {0}")]
    NotFound(String),
    /// Dedup hash collision or amend content collision
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Protected row mutation without force
    #[error("Permission denied: {0}")]
    Permission(String),
    /// Durable store unavailable or query failed
    #[error("Backend error: {0}")]
    Backend(#[from] rusqlite::Error),
    /// Filesystem failure opening or migrating the store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Store initialisation failure
    #[error("Initialisation error: {0}")]
    Init(String),
    /// External provider exceeded its bound
    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Memory result type
pub type Result<T> = std::result::Result<T, MemoryError>;
