use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::{self, Cursor, Write};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use tracing::debug;

use crate::error::{RepoError, RepoResult};
use crate::record::{Condition, Filter, Mutation, Record, RecordId, RefState, ReturnDocument, Selector};
use crate::traits::{BackingRepository, BlobWriter, RecordStream};

/// Reader over a committed record's content.
pub type MemoryReader = Cursor<Bytes>;

type Slot = (String, RecordId);

struct StoredRecord {
    record: Record,
    data: Bytes,
}

struct Shared {
    /// Keyed by `(key, id)` so iteration is already in enumeration order and
    /// duplicate keys can coexist.
    records: RwLock<BTreeMap<Slot, StoredRecord>>,
    counters: Mutex<HashMap<String, u64>>,
    unique_keys: bool,
    pending_writes: AtomicUsize,
}

impl Shared {
    fn read(&self) -> RepoResult<RwLockReadGuard<'_, BTreeMap<Slot, StoredRecord>>> {
        self.records
            .read()
            .map_err(|e| RepoError::Backend(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, BTreeMap<Slot, StoredRecord>>> {
        self.records
            .write()
            .map_err(|e| RepoError::Backend(format!("lock poisoned: {e}")))
    }
}

/// Slots holding `key`, in id order.
fn slots_for<'m>(map: &'m BTreeMap<Slot, StoredRecord>, key: &'m str) -> impl Iterator<Item = &'m Slot> + 'm {
    map.range((Bound::Included((key.to_string(), RecordId::MIN)), Bound::Unbounded))
        .map(|(slot, _)| slot)
        .take_while(move |(k, _)| k == key)
}

/// Resolve a selector to one slot, distinguishing "no such key" from
/// "condition did not hold".
fn select(map: &BTreeMap<Slot, StoredRecord>, key: &str, condition: Condition) -> RepoResult<Slot> {
    let mut seen = false;
    for slot in slots_for(map, key) {
        seen = true;
        if condition.matches(&map[slot].record) {
            return Ok(slot.clone());
        }
    }
    if seen {
        Err(RepoError::ConditionFailed { key: key.to_string() })
    } else {
        Err(RepoError::NotFound { key: key.to_string() })
    }
}

/// In-memory, `BTreeMap`-based backing repository.
///
/// Intended for tests, benchmarks and embedding. Clones share state, so one
/// repository can be handed to several stores and collectors. Writers stage
/// their bytes privately and only touch the shared map on commit.
#[derive(Clone)]
pub struct InMemoryRepository {
    shared: Arc<Shared>,
}

impl InMemoryRepository {
    /// Create an empty repository that rejects duplicate keys on commit.
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Create an empty repository without a uniqueness index.
    ///
    /// Commits never fail with `DuplicateKey`; racing writers instead leave
    /// several records under the same key, the way a backend with only a
    /// plain index would.
    pub fn without_unique_index() -> Self {
        Self::build(false)
    }

    fn build(unique_keys: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                records: RwLock::new(BTreeMap::new()),
                counters: Mutex::new(HashMap::new()),
                unique_keys,
                pending_writes: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of committed records.
    pub fn len(&self) -> usize {
        self.shared.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Returns `true` if no records are committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total content bytes across committed records.
    pub fn total_bytes(&self) -> u64 {
        self.shared
            .read()
            .map(|m| m.values().map(|s| s.record.size).sum())
            .unwrap_or(0)
    }

    /// All committed keys in order, duplicates included.
    pub fn keys(&self) -> Vec<String> {
        self.shared
            .read()
            .map(|m| m.keys().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default()
    }

    /// Writers created but neither committed nor aborted yet.
    pub fn pending_writes(&self) -> usize {
        self.shared.pending_writes.load(Ordering::SeqCst)
    }

    /// Overwrite a record's `last_referenced` timestamp.
    ///
    /// Lets tests age blobs without sleeping.
    pub fn set_last_referenced(&self, key: &str, at: chrono::DateTime<chrono::Utc>) -> RepoResult<()> {
        let mut map = self.shared.write()?;
        let slots: Vec<Slot> = slots_for(&map, key).cloned().collect();
        if slots.is_empty() {
            return Err(RepoError::NotFound { key: key.to_string() });
        }
        for slot in slots {
            if let Some(stored) = map.get_mut(&slot) {
                stored.record.last_referenced = at;
            }
        }
        Ok(())
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRepository")
            .field("record_count", &self.len())
            .field("unique_keys", &self.shared.unique_keys)
            .finish()
    }
}

/// Staged write into an [`InMemoryRepository`].
pub struct MemoryWriter {
    shared: Arc<Shared>,
    key: String,
    staged: Vec<u8>,
    finished: bool,
}

impl MemoryWriter {
    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.staged = Vec::new();
            self.shared.pending_writes.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(io::Error::new(io::ErrorKind::Other, "write after finalize"));
        }
        self.staged.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BlobWriter for MemoryWriter {
    fn commit(&mut self, state: RefState) -> RepoResult<Record> {
        if self.finished {
            return Err(RepoError::AbortedWrite { key: self.key.clone() });
        }
        let mut map = self.shared.write()?;
        if self.shared.unique_keys && slots_for(&map, &self.key).next().is_some() {
            return Err(RepoError::DuplicateKey { key: self.key.clone() });
        }
        let record = Record {
            id: RecordId::generate(),
            key: self.key.clone(),
            size: self.staged.len() as u64,
            ref_count: state.ref_count,
            last_referenced: state.last_referenced,
            generation: state.generation,
        };
        let data = Bytes::from(std::mem::take(&mut self.staged));
        map.insert(
            (record.key.clone(), record.id),
            StoredRecord {
                record: record.clone(),
                data,
            },
        );
        drop(map);
        self.finish();
        Ok(record)
    }

    fn abort(mut self) -> RepoResult<()> {
        self.finish();
        Ok(())
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        if !self.finished {
            debug!(key = %self.key, staged = self.staged.len(), "discarding uncommitted write");
            self.finish();
        }
    }
}

/// Cursor-paginated walk over the shared map.
///
/// Each page takes the read lock once, so concurrent writers interleave
/// between pages.
struct Pages {
    shared: Arc<Shared>,
    filter: Filter,
    batch_size: usize,
    after: Option<Slot>,
    buffer: VecDeque<Record>,
    exhausted: bool,
}

impl Pages {
    fn fetch(&mut self) -> RepoResult<()> {
        let map = self.shared.read()?;
        let prefix = self.filter.key_prefix();
        let lower = match &self.after {
            Some(slot) => Bound::Excluded(slot.clone()),
            None => Bound::Included((prefix.to_string(), RecordId::MIN)),
        };
        let mut last = None;
        let mut taken = 0;
        for (slot, stored) in map.range((lower, Bound::Unbounded)) {
            if taken == self.batch_size {
                break;
            }
            if !slot.0.starts_with(prefix) {
                // Past the end of the prefix range.
                last = None;
                break;
            }
            last = Some(slot.clone());
            if self.filter.matches(&stored.record) {
                self.buffer.push_back(stored.record.clone());
                taken += 1;
            }
        }
        match last {
            Some(slot) if taken == self.batch_size => self.after = Some(slot),
            _ => self.exhausted = true,
        }
        Ok(())
    }
}

impl Iterator for Pages {
    type Item = RepoResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

impl BackingRepository for InMemoryRepository {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn open(&self, key: &str) -> RepoResult<MemoryReader> {
        let map = self.shared.read()?;
        let slot = select(&map, key, Condition::Always)?;
        Ok(Cursor::new(map[&slot].data.clone()))
    }

    fn stat(&self, key: &str) -> RepoResult<Option<Record>> {
        let map = self.shared.read()?;
        let record = slots_for(&map, key).next().map(|slot| map[slot].record.clone());
        Ok(record)
    }

    fn create(&self, key: &str) -> RepoResult<MemoryWriter> {
        self.shared.pending_writes.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryWriter {
            shared: Arc::clone(&self.shared),
            key: key.to_string(),
            staged: Vec::new(),
            finished: false,
        })
    }

    fn increment(&self, selector: &Selector, mutation: &Mutation) -> RepoResult<()> {
        let mut map = self.shared.write()?;
        let slot = select(&map, &selector.key, selector.condition)?;
        if let Some(stored) = map.get_mut(&slot) {
            mutation.apply(&mut stored.record);
        }
        Ok(())
    }

    fn find_and_modify(
        &self,
        selector: &Selector,
        mutation: &Mutation,
        returning: ReturnDocument,
    ) -> RepoResult<Option<Record>> {
        let mut map = self.shared.write()?;
        let slot = match select(&map, &selector.key, selector.condition) {
            Ok(slot) => slot,
            Err(RepoError::NotFound { .. }) | Err(RepoError::ConditionFailed { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let Some(stored) = map.get_mut(&slot) else {
            return Ok(None);
        };
        let before = stored.record.clone();
        mutation.apply(&mut stored.record);
        Ok(Some(match returning {
            ReturnDocument::Before => before,
            ReturnDocument::After => stored.record.clone(),
        }))
    }

    fn rename(&self, old_key: &str, new_key: &str, condition: Condition) -> RepoResult<Record> {
        let mut map = self.shared.write()?;
        let slot = select(&map, old_key, condition)?;
        if self.shared.unique_keys && slots_for(&map, new_key).next().is_some() {
            return Err(RepoError::DuplicateKey { key: new_key.to_string() });
        }
        let Some(mut stored) = map.remove(&slot) else {
            return Err(RepoError::NotFound { key: old_key.to_string() });
        };
        stored.record.key = new_key.to_string();
        let record = stored.record.clone();
        map.insert((new_key.to_string(), record.id), stored);
        Ok(record)
    }

    fn enumerate(&self, filter: &Filter, batch_size: usize) -> RepoResult<RecordStream<'_>> {
        Ok(Box::new(Pages {
            shared: Arc::clone(&self.shared),
            filter: filter.clone(),
            batch_size: batch_size.max(1),
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }))
    }

    fn delete(&self, key: &str) -> RepoResult<bool> {
        let mut map = self.shared.write()?;
        let slots: Vec<Slot> = slots_for(&map, key).cloned().collect();
        for slot in &slots {
            map.remove(slot);
        }
        Ok(!slots.is_empty())
    }

    fn delete_record(&self, id: RecordId) -> RepoResult<bool> {
        let mut map = self.shared.write()?;
        let before = map.len();
        map.retain(|(_, rid), _| *rid != id);
        Ok(map.len() != before)
    }

    fn delete_matching(&self, filter: &Filter) -> RepoResult<u64> {
        let mut map = self.shared.write()?;
        let before = map.len();
        map.retain(|_, stored| !filter.matches(&stored.record));
        Ok((before - map.len()) as u64)
    }

    fn fetch_add_counter(&self, name: &str) -> RepoResult<u64> {
        let mut counters = self
            .shared
            .counters
            .lock()
            .map_err(|e| RepoError::Backend(format!("lock poisoned: {e}")))?;
        let value = counters.entry(name.to_string()).or_insert(0);
        let previous = *value;
        *value += 1;
        Ok(previous)
    }

    fn read_counter(&self, name: &str) -> RepoResult<u64> {
        let counters = self
            .shared
            .counters
            .lock()
            .map_err(|e| RepoError::Backend(format!("lock poisoned: {e}")))?;
        Ok(counters.get(name).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blob_types::Generation;
    use chrono::{Duration, Utc};
    use std::io::Read;

    fn put(repo: &InMemoryRepository, key: &str, data: &[u8]) -> Record {
        let mut w = repo.create(key).unwrap();
        w.write_all(data).unwrap();
        w.commit(RefState::first_reference(Generation::ZERO)).unwrap()
    }

    fn read_all(repo: &InMemoryRepository, key: &str) -> Vec<u8> {
        let mut out = Vec::new();
        repo.open(key).unwrap().read_to_end(&mut out).unwrap();
        out
    }

    // -----------------------------------------------------------------------
    // Staged writes
    // -----------------------------------------------------------------------

    #[test]
    fn commit_makes_content_visible() {
        let repo = InMemoryRepository::new();
        let rec = put(&repo, "blob-a", b"hello");
        assert_eq!(rec.size, 5);
        assert_eq!(rec.ref_count, 1);
        assert_eq!(read_all(&repo, "blob-a"), b"hello");
        assert_eq!(repo.pending_writes(), 0);
    }

    #[test]
    fn uncommitted_write_is_invisible() {
        let repo = InMemoryRepository::new();
        let mut w = repo.create("blob-a").unwrap();
        w.write_all(b"partial").unwrap();
        assert!(repo.open("blob-a").unwrap_err().is_not_found());
        assert!(repo.stat("blob-a").unwrap().is_none());
        assert_eq!(repo.pending_writes(), 1);
        w.abort().unwrap();
        assert_eq!(repo.pending_writes(), 0);
        assert!(repo.is_empty());
    }

    #[test]
    fn dropping_writer_aborts() {
        let repo = InMemoryRepository::new();
        {
            let mut w = repo.create("blob-a").unwrap();
            w.write_all(b"partial").unwrap();
        }
        assert_eq!(repo.pending_writes(), 0);
        assert!(repo.is_empty());
    }

    #[test]
    fn duplicate_commit_is_rejected() {
        let repo = InMemoryRepository::new();
        let mut first = repo.create("blob-a").unwrap();
        let mut second = repo.create("blob-a").unwrap();
        first.write_all(b"x").unwrap();
        second.write_all(b"x").unwrap();
        first.commit(RefState::first_reference(Generation::ZERO)).unwrap();
        let err = second.commit(RefState::first_reference(Generation::ZERO)).unwrap_err();
        assert!(err.is_duplicate_key());
        // The loser still owns its staging area until it aborts.
        assert_eq!(repo.pending_writes(), 1);
        second.abort().unwrap();
        assert_eq!(repo.pending_writes(), 0);
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn without_unique_index_allows_duplicates() {
        let repo = InMemoryRepository::without_unique_index();
        put(&repo, "blob-a", b"x");
        put(&repo, "blob-a", b"x");
        assert_eq!(repo.keys(), vec!["blob-a", "blob-a"]);
    }

    #[test]
    fn commit_twice_fails() {
        let repo = InMemoryRepository::without_unique_index();
        let mut w = repo.create("blob-a").unwrap();
        w.commit(RefState::first_reference(Generation::ZERO)).unwrap();
        let err = w.commit(RefState::first_reference(Generation::ZERO)).unwrap_err();
        assert!(matches!(err, RepoError::AbortedWrite { .. }));
        assert!(w.write(b"late").is_err());
    }

    // -----------------------------------------------------------------------
    // Conditional primitives
    // -----------------------------------------------------------------------

    #[test]
    fn increment_missing_is_not_found() {
        let repo = InMemoryRepository::new();
        let err = repo
            .increment(&Selector::key("blob-a"), &Mutation::add_reference())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn increment_and_condition() {
        let repo = InMemoryRepository::new();
        put(&repo, "blob-a", b"x");
        repo.increment(&Selector::key("blob-a"), &Mutation::add_reference()).unwrap();
        assert_eq!(repo.stat("blob-a").unwrap().unwrap().ref_count, 2);

        let err = repo
            .increment(
                &Selector::key("blob-a").when(Condition::RefCountEquals(0)),
                &Mutation::add_reference(),
            )
            .unwrap_err();
        assert!(err.is_condition_failed());
    }

    #[test]
    fn find_and_modify_returns_requested_version() {
        let repo = InMemoryRepository::new();
        put(&repo, "blob-a", b"x");
        let before = repo
            .find_and_modify(&Selector::key("blob-a"), &Mutation::add_reference(), ReturnDocument::Before)
            .unwrap()
            .unwrap();
        assert_eq!(before.ref_count, 1);
        let after = repo
            .find_and_modify(&Selector::key("blob-a"), &Mutation::drop_reference(), ReturnDocument::After)
            .unwrap()
            .unwrap();
        assert_eq!(after.ref_count, 1);
        assert!(repo
            .find_and_modify(&Selector::key("blob-b"), &Mutation::drop_reference(), ReturnDocument::After)
            .unwrap()
            .is_none());
    }

    #[test]
    fn rename_respects_condition() {
        let repo = InMemoryRepository::new();
        put(&repo, "blob-a", b"x");
        let err = repo
            .rename("blob-a", "tombstone-1", Condition::RefCountEquals(0))
            .unwrap_err();
        assert!(err.is_condition_failed());
        assert!(repo.rename("missing", "tombstone-1", Condition::Always).unwrap_err().is_not_found());

        let moved = repo.rename("blob-a", "tombstone-1", Condition::RefCountEquals(1)).unwrap();
        assert_eq!(moved.key, "tombstone-1");
        assert!(repo.stat("blob-a").unwrap().is_none());
        assert_eq!(read_all(&repo, "tombstone-1"), b"x");
    }

    // -----------------------------------------------------------------------
    // Enumeration and deletion
    // -----------------------------------------------------------------------

    #[test]
    fn enumerate_is_sorted_and_paginated() {
        let repo = InMemoryRepository::new();
        for key in ["blob-c", "blob-a", "other", "blob-b", "blob-d"] {
            put(&repo, key, key.as_bytes());
        }
        let keys: Vec<String> = repo
            .enumerate(&Filter::KeyPrefix("blob-".into()), 2)
            .unwrap()
            .map(|r| r.unwrap().key)
            .collect();
        assert_eq!(keys, vec!["blob-a", "blob-b", "blob-c", "blob-d"]);
    }

    #[test]
    fn enumerate_stays_within_prefix_range() {
        let repo = InMemoryRepository::new();
        for key in ["a-1", "blob-x", "c-1", "c-2", "blob-y", "tombstone-1", "z"] {
            put(&repo, key, key.as_bytes());
        }
        for batch in [1, 2, 100] {
            let keys: Vec<String> = repo
                .enumerate(&Filter::KeyPrefix("c-".into()), batch)
                .unwrap()
                .map(|r| r.unwrap().key)
                .collect();
            assert_eq!(keys, vec!["c-1", "c-2"], "batch {batch}");
        }
        let empty = repo.enumerate(&Filter::KeyPrefix("missing-".into()), 1).unwrap().count();
        assert_eq!(empty, 0);
    }

    #[test]
    fn stat_returns_lowest_id_record() {
        let repo = InMemoryRepository::without_unique_index();
        let first = put(&repo, "blob-a", b"one");
        put(&repo, "blob-a", b"two!");
        let rec = repo.stat("blob-a").unwrap().unwrap();
        assert_eq!(rec.id, first.id);
        assert_eq!(rec.size, 3);
        assert!(repo.stat("blob-b").unwrap().is_none());
    }

    #[test]
    fn enumerate_filters_by_age() {
        let repo = InMemoryRepository::new();
        put(&repo, "blob-old", b"1");
        put(&repo, "blob-new", b"2");
        let cutoff = Utc::now();
        repo.set_last_referenced("blob-old", cutoff - Duration::hours(1)).unwrap();
        repo.set_last_referenced("blob-new", cutoff + Duration::hours(1)).unwrap();
        let keys: Vec<String> = repo
            .enumerate(&Filter::KeyPrefixReferencedBefore("blob-".into(), cutoff), 10)
            .unwrap()
            .map(|r| r.unwrap().key)
            .collect();
        assert_eq!(keys, vec!["blob-old"]);
    }

    #[test]
    fn enumerate_sees_duplicates_adjacent() {
        let repo = InMemoryRepository::without_unique_index();
        put(&repo, "blob-b", b"x");
        put(&repo, "blob-a", b"y");
        put(&repo, "blob-b", b"x");
        let records: Vec<Record> = repo
            .enumerate(&Filter::KeyPrefix("blob-".into()), 1)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].key, records[2].key);
        assert!(records[1].id < records[2].id);
    }

    #[test]
    fn delete_variants() {
        let repo = InMemoryRepository::without_unique_index();
        let a1 = put(&repo, "blob-a", b"x");
        put(&repo, "blob-a", b"x");
        put(&repo, "tombstone-1", b"y");
        put(&repo, "tombstone-2", b"z");

        assert!(repo.delete_record(a1.id).unwrap());
        assert!(!repo.delete_record(a1.id).unwrap());
        assert_eq!(repo.delete_matching(&Filter::KeyPrefix("tombstone-".into())).unwrap(), 2);
        assert!(repo.delete("blob-a").unwrap());
        assert!(!repo.delete("blob-a").unwrap());
        assert!(repo.is_empty());
    }

    // -----------------------------------------------------------------------
    // Counters
    // -----------------------------------------------------------------------

    #[test]
    fn counters_start_at_zero() {
        let repo = InMemoryRepository::new();
        assert_eq!(repo.read_counter("gen").unwrap(), 0);
        assert_eq!(repo.fetch_add_counter("gen").unwrap(), 0);
        assert_eq!(repo.fetch_add_counter("gen").unwrap(), 1);
        assert_eq!(repo.read_counter("gen").unwrap(), 2);
        assert_eq!(repo.read_counter("other").unwrap(), 0);
    }

    #[test]
    fn clones_share_state() {
        let repo = InMemoryRepository::new();
        let other = repo.clone();
        put(&repo, "blob-a", b"shared");
        assert_eq!(other.total_bytes(), 6);
        let debug = format!("{other:?}");
        assert!(debug.contains("InMemoryRepository"));
        assert!(debug.contains("record_count"));
    }
}
