use std::sync::Arc;

use blob_repo::BackingRepository;
use blob_types::Generation;

use crate::error::GcResult;

/// Durable, monotonically increasing GC generation.
///
/// Backed by a named counter in the repository, so every process sharing the
/// repository draws from the same sequence. Concurrent callers each receive a
/// distinct value; `N` calls yield exactly `0..N`.
pub struct GenerationCounter<R> {
    repo: Arc<R>,
    name: String,
}

impl<R: BackingRepository> GenerationCounter<R> {
    pub fn new(repo: Arc<R>, name: impl Into<String>) -> Self {
        Self {
            repo,
            name: name.into(),
        }
    }

    /// Claim the next generation.
    pub fn next(&self) -> GcResult<Generation> {
        Ok(Generation(self.repo.fetch_add_counter(&self.name)?))
    }

    /// The generation the next call to [`next`](Self::next) would return.
    pub fn current(&self) -> GcResult<Generation> {
        Ok(Generation(self.repo.read_counter(&self.name)?))
    }
}

impl<R> Clone for GenerationCounter<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            name: self.name.clone(),
        }
    }
}
