use std::io::Read;
use std::sync::Arc;

use blob_crypto::{copy_and_verify_buffered, verify_reader};
use blob_repo::{
    BackingRepository, BlobWriter, Condition, Mutation, RefState, RepoError, ReturnDocument, Selector,
};
use blob_types::{ContentHash, Generation};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};

/// Deduplicating blob store over a shared backing repository.
///
/// The store keeps no mutable state of its own. Wrap it in an `Arc` to share
/// it between threads, or build several stores over the same repository;
/// either way every state transition is a single conditional repository call.
pub struct DedupStore<R> {
    repo: Arc<R>,
    config: StoreConfig,
}

impl<R> Clone for DedupStore<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            config: self.config.clone(),
        }
    }
}

impl<R: BackingRepository> DedupStore<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self::with_config(repo, StoreConfig::default())
    }

    pub fn with_config(repo: Arc<R>, config: StoreConfig) -> Self {
        Self { repo, config }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Store the bytes yielded by `reader` under `hash`, or take another
    /// reference on them if they are already stored.
    ///
    /// Returns `true` when the content already existed, in which case nothing
    /// was read from `reader`. Returns `false` when this call read and
    /// verified the content itself, even if a concurrent creator ended up
    /// owning the physical copy.
    pub fn create<Rd: Read>(&self, hash: &ContentHash, mut reader: Rd) -> StoreResult<bool> {
        let key = self.config.keys.blob_key(hash);
        if self.add_reference(hash, &key)? {
            debug!(hash = %hash.short_hex(), "blob exists; reference added");
            return Ok(true);
        }

        let generation = self
            .repo
            .read_counter(&self.config.keys.generation_counter)
            .map(Generation)
            .map_err(|e| StoreError::from_repo(hash, e))?;
        let mut writer = self.repo.create(&key).map_err(|e| StoreError::from_repo(hash, e))?;
        if let Err(e) = copy_and_verify_buffered(&mut writer, &mut reader, hash, self.config.copy_buffer_size) {
            discard(writer, &key);
            let err = StoreError::from(e);
            if err.is_checksum_mismatch() {
                warn!(hash = %hash.short_hex(), error = %err, "rejected blob");
            }
            return Err(err);
        }

        match writer.commit(RefState::first_reference(generation)) {
            Ok(record) => {
                debug!(hash = %hash.short_hex(), size = record.size, %generation, "blob committed");
                Ok(false)
            }
            Err(RepoError::DuplicateKey { .. }) => {
                discard(writer, &key);
                debug!(hash = %hash.short_hex(), "lost creation race; referencing winner");
                if self.add_reference(hash, &key)? {
                    Ok(false)
                } else {
                    warn!(hash = %hash.short_hex(), "winning blob vanished before it could be referenced");
                    Err(StoreError::RaceLost { hash: hash.clone() })
                }
            }
            Err(e) => {
                discard(writer, &key);
                Err(StoreError::from_repo(hash, e))
            }
        }
    }

    /// Open the stored bytes for `hash`.
    pub fn open(&self, hash: &ContentHash) -> StoreResult<R::Reader> {
        let key = self.config.keys.blob_key(hash);
        self.repo.open(&key).map_err(|e| StoreError::from_repo(hash, e))
    }

    /// Size in bytes of the blob for `hash`, or `None` if there is none.
    pub fn check(&self, hash: &ContentHash) -> StoreResult<Option<u64>> {
        let key = self.config.keys.blob_key(hash);
        let record = self.repo.stat(&key).map_err(|e| StoreError::from_repo(hash, e))?;
        Ok(record.map(|record| record.size))
    }

    /// Current reference count for `hash`, or `None` if there is no blob.
    pub fn ref_count(&self, hash: &ContentHash) -> StoreResult<Option<u64>> {
        let key = self.config.keys.blob_key(hash);
        let record = self.repo.stat(&key).map_err(|e| StoreError::from_repo(hash, e))?;
        Ok(record.map(|record| record.ref_count))
    }

    /// Drop one reference to `hash`, deleting the blob when none remain.
    ///
    /// Removing an absent hash is a no-op.
    pub fn remove(&self, hash: &ContentHash) -> StoreResult<()> {
        let key = self.config.keys.blob_key(hash);
        let selector = Selector::key(key.as_str()).when(Condition::RefCountAtLeast(1));
        let Some(record) =
            self.repo
                .find_and_modify(&selector, &Mutation::drop_reference(), ReturnDocument::After)
                .map_err(|e| StoreError::from_repo(hash, e))?
        else {
            debug!(hash = %hash.short_hex(), "remove of unreferenced blob ignored");
            return Ok(());
        };
        if record.ref_count > 0 {
            return Ok(());
        }

        // A create may have re-referenced the blob since the decrement.
        let tombstone = self.config.keys.tombstone_key();
        match self.repo.rename(&key, &tombstone, Condition::RefCountEquals(0)) {
            Ok(_) => {
                self.repo
                    .delete(&tombstone)
                    .map_err(|e| StoreError::from_repo(hash, e))?;
                debug!(hash = %hash.short_hex(), "blob deleted");
                Ok(())
            }
            Err(RepoError::ConditionFailed { .. }) | Err(RepoError::NotFound { .. }) => {
                debug!(hash = %hash.short_hex(), "blob re-referenced or already gone; deletion abandoned");
                Ok(())
            }
            Err(e) => Err(StoreError::from_repo(hash, e)),
        }
    }

    /// Re-read the stored blob and confirm it still hashes to `hash`.
    ///
    /// Returns the verified size. A `ChecksumMismatch` here means the
    /// repository's copy is corrupt.
    pub fn verify(&self, hash: &ContentHash) -> StoreResult<u64> {
        let mut reader = self.open(hash)?;
        verify_reader(&mut reader, hash).map_err(|e| {
            let err = StoreError::from(e);
            if err.is_checksum_mismatch() {
                warn!(hash = %hash.short_hex(), "stored blob failed verification");
            }
            err
        })
    }

    /// Take a reference on the blob under `key`; `false` if there is none.
    fn add_reference(&self, hash: &ContentHash, key: &str) -> StoreResult<bool> {
        match self.repo.increment(&Selector::key(key), &Mutation::add_reference()) {
            Ok(()) => Ok(true),
            Err(RepoError::NotFound { .. }) => Ok(false),
            Err(e) => Err(StoreError::from_repo(hash, e)),
        }
    }
}

/// Abort a staged write. The operation's own outcome takes precedence over
/// a failed abort, so that failure is only logged.
fn discard<W: BlobWriter>(writer: W, key: &str) {
    if let Err(e) = writer.abort() {
        warn!(key, error = %e, "failed to abort staged write");
    }
}

impl<R> std::fmt::Debug for DedupStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupStore").field("config", &self.config).finish()
    }
}
