// Error taxonomy for the moderation core.
//
// Every failure the pipeline can see falls into one of these kinds, and the
// kind decides what happens to the item: ClassifierUnavailable defers it to
// the next tick, InvalidInput flags it permanently, Storage either aborts the
// tick (on fetch) or defers the single item (on persist/mark).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModerationError {
    /// Network failure, timeout, or non-2xx response from a classifier.
    #[error("classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    /// Malformed content or payload. Retrying will not help.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Fetch, persist, or mark failure in the content store.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("content item {0} not found")]
    NotFound(i64),

    #[error("scheduler already started")]
    AlreadyStarted,
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, ModerationError>;

impl ModerationError {
    /// Create a storage error from any displayable message.
    pub fn storage(msg: impl std::fmt::Display) -> Self {
        Self::Storage(msg.to_string())
    }

    pub fn unavailable(msg: impl std::fmt::Display) -> Self {
        Self::ClassifierUnavailable(msg.to_string())
    }

    pub fn invalid(msg: impl std::fmt::Display) -> Self {
        Self::InvalidInput(msg.to_string())
    }

    /// Whether the failed item should be retried on a later tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ClassifierUnavailable(_) | Self::Storage(_))
    }
}

// SQL helpers return anyhow; everything that crosses the store boundary
// becomes a storage error.
impl From<anyhow::Error> for ModerationError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }
}

impl From<reqwest::Error> for ModerationError {
    fn from(err: reqwest::Error) -> Self {
        // A request we could not even build is our fault, not the endpoint's.
        if err.is_builder() {
            Self::InvalidInput(err.to_string())
        } else {
            Self::ClassifierUnavailable(err.to_string())
        }
    }
}
