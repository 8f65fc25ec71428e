/// Errors from backing repository operations.
///
/// The first four variants are expected outcomes of conditional primitives
/// and drive the store's branches. `Backend` and `Io` are transient failures
/// that callers may retry.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// No record matched the key or selector.
    #[error("record not found: {key}")]
    NotFound { key: String },

    /// Commit or rename would create a second record under a unique key.
    #[error("duplicate key: {key}")]
    DuplicateKey { key: String },

    /// A record exists but the operation's condition did not hold.
    #[error("condition failed for {key}")]
    ConditionFailed { key: String },

    /// The write handle was already committed or aborted.
    #[error("write to {key} was already finalized")]
    AbortedWrite { key: String },

    /// Transient failure inside the backend.
    #[error("backend error: {0}")]
    Backend(String),

    /// I/O error from the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepoError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }

    pub fn is_condition_failed(&self) -> bool {
        matches!(self, Self::ConditionFailed { .. })
    }

    /// `true` for failures a caller may reasonably retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Io(_))
    }
}

/// Result alias for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;
