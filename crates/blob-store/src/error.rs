use blob_crypto::VerifyError;
use blob_repo::RepoError;
use blob_types::ContentHash;

/// Errors surfaced by [`DedupStore`](crate::DedupStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The supplied bytes do not hash to the claimed value. Nothing was stored.
    #[error("file checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        expected: ContentHash,
        actual: ContentHash,
    },

    /// No live blob exists for the hash.
    #[error("blob not found: {hash}")]
    NotFound { hash: ContentHash },

    /// Lost a race against a concurrent writer, typically because the
    /// winning blob was removed before a reference could be taken on it.
    /// Not retried.
    #[error("creation race lost for {hash}: winning blob was removed concurrently")]
    RaceLost { hash: ContentHash },

    /// The caller-supplied reader failed.
    #[error("reading blob content failed: {0}")]
    Read(#[source] std::io::Error),

    /// Transient failure in the backing repository; safe to retry.
    #[error("backing repository error: {0}")]
    Backend(#[source] RepoError),
}

impl StoreError {
    /// Translate a repository failure on `hash`'s blob.
    ///
    /// Only transient failures surface as `Backend`; the conditional
    /// outcomes map onto the store's own variants.
    pub fn from_repo(hash: &ContentHash, err: RepoError) -> Self {
        match err {
            RepoError::NotFound { .. } => Self::NotFound { hash: hash.clone() },
            RepoError::DuplicateKey { .. } | RepoError::ConditionFailed { .. } => {
                Self::RaceLost { hash: hash.clone() }
            }
            RepoError::AbortedWrite { .. } | RepoError::Backend(_) | RepoError::Io(_) => Self::Backend(err),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_checksum_mismatch(&self) -> bool {
        matches!(self, Self::ChecksumMismatch { .. })
    }
}

impl From<VerifyError> for StoreError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::ChecksumMismatch { expected, actual } => {
                Self::ChecksumMismatch { expected, actual }
            }
            VerifyError::Read(e) => Self::Read(e),
            VerifyError::Write(e) => Self::Backend(RepoError::Io(e)),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
