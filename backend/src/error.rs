use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Relationship conflicts surfaced to the caller as-is. None of them implies a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    AlreadyLiked,
    AlreadyMatched,
    NotMatched,
    Blocked,
}

impl ConflictKind {
    pub fn code(&self) -> &'static str {
        match self {
            ConflictKind::AlreadyLiked => "already_liked",
            ConflictKind::AlreadyMatched => "already_matched",
            ConflictKind::NotMatched => "not_matched",
            ConflictKind::Blocked => "blocked",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    /// Missing or malformed ids, coordinates or transitions. Nothing was changed.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(ConflictKind),

    #[error("Cooldown active, retry after {}ms", retry_after.as_millis())]
    Cooldown { retry_after: Duration },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Venue search failed or timed out
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        CoreError::NotFound(what.into())
    }

    /// Stable machine-readable code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation",
            CoreError::Conflict(kind) => kind.code(),
            CoreError::Cooldown { .. } => "cooldown",
            CoreError::NotFound(_) => "not_found",
            CoreError::UpstreamUnavailable(_) => "upstream_unavailable",
            CoreError::Storage(_) => "internal",
        }
    }

    pub fn conflict(&self) -> Option<ConflictKind> {
        match self {
            CoreError::Conflict(kind) => Some(*kind),
            _ => None,
        }
    }
}

impl From<ConflictKind> for CoreError {
    fn from(kind: ConflictKind) -> Self {
        CoreError::Conflict(kind)
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
