use blob_repo::RepoError;

/// Errors from garbage collection.
#[derive(Debug, thiserror::Error)]
pub enum GcError {
    /// The collector configuration is unusable.
    #[error("invalid gc config: {0}")]
    InvalidConfig(String),

    /// Transient failure in the backing repository. The pass stopped early;
    /// tombstones it left behind are cleared by the next pass.
    #[error("backing repository error: {0}")]
    Backend(#[from] RepoError),
}

/// Result alias for garbage collection.
pub type GcResult<T> = Result<T, GcError>;
