use std::io::{Read, Seek, Write};

use crate::error::RepoResult;
use crate::record::{Condition, Filter, Mutation, Record, RecordId, RefState, ReturnDocument, Selector};

/// Lazy, key-ordered sequence of records.
pub type RecordStream<'a> = Box<dyn Iterator<Item = RepoResult<Record>> + Send + 'a>;

/// Handle to a record being written.
///
/// Bytes written through the handle are invisible until [`commit`](Self::commit)
/// succeeds. Dropping an uncommitted handle has the same effect as
/// [`abort`](Self::abort).
pub trait BlobWriter: Write + Send {
    /// Make the record visible under its key with the given reference state.
    ///
    /// This is the single atomic visibility point. On `Err` nothing became
    /// visible; in particular a uniqueness conflict yields
    /// [`RepoError::DuplicateKey`](crate::RepoError::DuplicateKey) and the
    /// staged bytes stay with the handle until it is aborted or dropped.
    fn commit(&mut self, state: RefState) -> RepoResult<Record>;

    /// Discard all staged bytes.
    fn abort(self) -> RepoResult<()>
    where
        Self: Sized;
}

/// Conditional record store the deduplicating layer is built on.
///
/// Implementations must be thread-safe and every conditional primitive must
/// be atomic with respect to every other, including across processes sharing
/// the same backend. Callers hold no locks of their own.
pub trait BackingRepository: Send + Sync {
    type Reader: Read + Seek + Send;
    type Writer: BlobWriter;

    /// Open the content stored under `key`.
    ///
    /// Fails with `NotFound` if no committed record has that key.
    fn open(&self, key: &str) -> RepoResult<Self::Reader>;

    /// Metadata for the record under `key`, if any.
    fn stat(&self, key: &str) -> RepoResult<Option<Record>>;

    /// Start writing a new record that will live under `key`.
    fn create(&self, key: &str) -> RepoResult<Self::Writer>;

    /// Atomically apply `mutation` to the record matched by `selector`.
    ///
    /// Fails with `NotFound` if no record has the key, or `ConditionFailed`
    /// if one does but the selector's condition does not hold.
    fn increment(&self, selector: &Selector, mutation: &Mutation) -> RepoResult<()>;

    /// Atomically apply `mutation` and return the record before or after.
    ///
    /// Returns `Ok(None)` if nothing matched `selector`.
    fn find_and_modify(
        &self,
        selector: &Selector,
        mutation: &Mutation,
        returning: ReturnDocument,
    ) -> RepoResult<Option<Record>>;

    /// Atomically move the record under `old_key` to `new_key` if
    /// `condition` holds.
    ///
    /// Fails with `NotFound` if `old_key` is absent and `ConditionFailed` if
    /// the condition does not hold.
    fn rename(&self, old_key: &str, new_key: &str, condition: Condition) -> RepoResult<Record>;

    /// Records matching `filter`, ordered by key then id, fetched in pages of
    /// at most `batch_size`.
    fn enumerate(&self, filter: &Filter, batch_size: usize) -> RepoResult<RecordStream<'_>>;

    /// Delete every record under `key`. Returns `true` if anything was removed.
    fn delete(&self, key: &str) -> RepoResult<bool>;

    /// Delete one physical record by id.
    fn delete_record(&self, id: RecordId) -> RepoResult<bool>;

    /// Delete every record matching `filter` and return how many went.
    fn delete_matching(&self, filter: &Filter) -> RepoResult<u64>;

    /// Atomically increment the named counter, creating it at zero if needed,
    /// and return the value it held before.
    fn fetch_add_counter(&self, name: &str) -> RepoResult<u64>;

    /// Current value of the named counter (zero if never incremented).
    fn read_counter(&self, name: &str) -> RepoResult<u64>;
}
