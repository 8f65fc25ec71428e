use std::sync::Arc;

use blob_repo::{
    BackingRepository, Condition, Filter, Mutation, Record, RecordId, RepoError, ReturnDocument, Selector,
};
use blob_types::{ContentHash, Generation};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bloom::BloomFilter;
use crate::config::GcConfig;
use crate::error::GcResult;
use crate::generation::GenerationCounter;

/// Outcome of one collection pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// Generation claimed when the pass completed.
    pub generation: Generation,
    /// Blobs referenced at or after this instant were exempt.
    pub cutoff: DateTime<Utc>,
    /// Hashes read from the live-reference stream.
    pub live_refs: u64,
    /// Stale records examined.
    pub scanned: u64,
    /// Stale blobs kept because the filter reported them live.
    pub retained: u64,
    /// Duplicate-key records removed.
    pub duplicates: u64,
    /// Blobs this pass moved to a tombstone.
    pub tombstoned: u64,
    /// Tombstoned records physically deleted, including ones left by
    /// concurrent removals or earlier interrupted passes.
    pub deleted: u64,
}

/// Sweeps blobs that no live reference names.
///
/// Safe to run alongside arbitrary store traffic and alongside other
/// collectors over the same repository.
pub struct GarbageCollector<R> {
    repo: Arc<R>,
    config: GcConfig,
    generations: GenerationCounter<R>,
}

impl<R: BackingRepository> GarbageCollector<R> {
    pub fn new(repo: Arc<R>, config: GcConfig) -> GcResult<Self> {
        config.validate()?;
        let generations = GenerationCounter::new(Arc::clone(&repo), config.keys.generation_counter.clone());
        Ok(Self {
            repo,
            config,
            generations,
        })
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn generations(&self) -> &GenerationCounter<R> {
        &self.generations
    }

    /// Run a pass with the cutoff set `min_age_secs` before now.
    ///
    /// The cutoff is taken before `live` is read, so blobs created while the
    /// live set is being produced are never candidates.
    pub fn collect<I>(&self, live: I) -> GcResult<GcReport>
    where
        I: IntoIterator<Item = ContentHash>,
    {
        let now = Utc::now();
        let cutoff = Duration::from_std(std::time::Duration::from_secs(self.config.min_age_secs))
            .ok()
            .and_then(|min_age| now.checked_sub_signed(min_age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.collect_before(live, cutoff)
    }

    /// Run a pass that only considers blobs last referenced before `cutoff`.
    ///
    /// `live` is consumed exactly once; its end is the signal that the live
    /// set is complete. A `std::sync::mpsc::Receiver<ContentHash>` works as
    /// is.
    pub fn collect_before<I>(&self, live: I, cutoff: DateTime<Utc>) -> GcResult<GcReport>
    where
        I: IntoIterator<Item = ContentHash>,
    {
        let keys = &self.config.keys;
        let mut filter = BloomFilter::with_rate(self.config.expected_live_refs, self.config.false_positive_rate);
        for hash in live {
            filter.insert(hash.as_str().as_bytes());
        }
        if filter.is_overfull() {
            warn!(
                live_refs = filter.len(),
                expected = self.config.expected_live_refs,
                estimated_fp_rate = filter.estimated_fp_rate(),
                "live set exceeds filter sizing; more garbage will be retained"
            );
        }

        let mut report = GcReport {
            generation: Generation::ZERO,
            cutoff,
            live_refs: filter.len(),
            scanned: 0,
            retained: 0,
            duplicates: 0,
            tombstoned: 0,
            deleted: 0,
        };

        let stale = Filter::KeyPrefixReferencedBefore(keys.blob_prefix.clone(), cutoff);
        // Key and id of the record that holds the content for the current key.
        let mut survivor: Option<(String, RecordId)> = None;
        for record in self.repo.enumerate(&stale, self.config.batch_size)? {
            let record = record?;
            report.scanned += 1;

            let Some(hash) = keys.hash_from_key(&record.key) else {
                continue;
            };

            if let Some((key, id)) = &survivor {
                if *key == record.key {
                    // Left behind by a creation race on a backend without a
                    // uniqueness index; fold it into the earlier record.
                    match self.merge_duplicate(&record, *id)? {
                        Merge::Folded { deleted } => {
                            if deleted {
                                report.duplicates += 1;
                            }
                            continue;
                        }
                        Merge::Vanished => continue,
                        Merge::SurvivorGone => {}
                    }
                }
            }
            survivor = Some((record.key.clone(), record.id));

            if filter.contains(hash.as_str().as_bytes()) {
                report.retained += 1;
                continue;
            }

            // Re-check the age atomically: a create may have touched the
            // blob since it was listed.
            let tombstone = keys.tombstone_key();
            match self.repo.rename(&record.key, &tombstone, Condition::ReferencedBefore(cutoff)) {
                Ok(_) => report.tombstoned += 1,
                Err(RepoError::ConditionFailed { .. }) | Err(RepoError::NotFound { .. }) => {
                    debug!(hash = %hash.short_hex(), "candidate referenced or removed during scan; skipped");
                }
                Err(e) => return Err(e.into()),
            }
        }

        report.deleted = self
            .repo
            .delete_matching(&Filter::KeyPrefix(keys.tombstone_prefix.clone()))?;
        report.generation = self.generations.next()?;

        info!(
            generation = %report.generation,
            live_refs = report.live_refs,
            scanned = report.scanned,
            retained = report.retained,
            duplicates = report.duplicates,
            deleted = report.deleted,
            "garbage collection pass complete"
        );
        Ok(report)
    }
}

/// Outcome of folding a duplicate record into the one before it.
enum Merge {
    /// References moved over; `deleted` if this pass removed the duplicate.
    Folded { deleted: bool },
    /// The duplicate was already drained or removed by someone else.
    Vanished,
    /// The earlier record is gone, so the duplicate kept its references and
    /// now stands in for it.
    SurvivorGone,
}

impl<R: BackingRepository> GarbageCollector<R> {
    /// Move `dup`'s references onto the record `survivor`, then delete `dup`.
    ///
    /// The references are claimed with one atomic drain, so concurrent
    /// passes cannot both transfer them.
    fn merge_duplicate(&self, dup: &Record, survivor: RecordId) -> GcResult<Merge> {
        let this = Selector::key(dup.key.as_str()).when(Condition::RecordIs(dup.id));
        let Some(before) = self
            .repo
            .find_and_modify(&this, &Mutation::drain(), ReturnDocument::Before)?
        else {
            return Ok(Merge::Vanished);
        };

        let refs = i64::try_from(before.ref_count).unwrap_or(i64::MAX);
        if refs > 0 {
            let target = Selector::key(dup.key.as_str()).when(Condition::RecordIs(survivor));
            match self.repo.increment(&target, &Mutation::adjust(refs)) {
                Ok(()) => {}
                Err(RepoError::NotFound { .. }) | Err(RepoError::ConditionFailed { .. }) => {
                    match self.repo.increment(&this, &Mutation::adjust(refs)) {
                        Ok(()) => {}
                        Err(RepoError::NotFound { .. }) | Err(RepoError::ConditionFailed { .. }) => {
                            warn!(key = %dup.key, id = %dup.id, refs, "duplicate removed while its references were in transit");
                        }
                        Err(e) => return Err(e.into()),
                    }
                    debug!(key = %dup.key, id = %dup.id, "earlier record gone; duplicate kept");
                    return Ok(Merge::SurvivorGone);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let deleted = self.repo.delete_record(dup.id)?;
        debug!(key = %dup.key, id = %dup.id, refs, deleted, "folded duplicate blob record");
        Ok(Merge::Folded { deleted })
    }
}

impl<R> std::fmt::Debug for GarbageCollector<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarbageCollector").field("config", &self.config).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blob_repo::{BlobWriter, InMemoryRepository, RefState};
    use std::io::Write;

    fn put(repo: &InMemoryRepository, key: &str, data: &[u8]) {
        let mut w = repo.create(key).unwrap();
        w.write_all(data).unwrap();
        w.commit(RefState::first_reference(Generation::ZERO)).unwrap();
    }

    fn collector(repo: &Arc<InMemoryRepository>) -> GarbageCollector<InMemoryRepository> {
        GarbageCollector::new(Arc::clone(repo), GcConfig::default()).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let config = GcConfig {
            batch_size: 0,
            ..GcConfig::default()
        };
        assert!(GarbageCollector::new(Arc::new(InMemoryRepository::new()), config).is_err());
    }

    #[test]
    fn empty_repository() {
        let repo = Arc::new(InMemoryRepository::new());
        let report = collector(&repo).collect(Vec::new()).unwrap();
        assert_eq!(report.scanned, 0);
        assert_eq!(report.deleted, 0);
        assert_eq!(report.generation, Generation(0));
    }

    #[test]
    fn foreign_keys_are_ignored() {
        let repo = Arc::new(InMemoryRepository::new());
        put(&repo, "blob-not-a-hash", b"x");
        put(&repo, "config", b"y");
        let cutoff = Utc::now() + Duration::seconds(60);
        let report = collector(&repo).collect_before(Vec::new(), cutoff).unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.tombstoned, 0);
        assert_eq!(repo.len(), 2);
    }

    #[test]
    fn leftover_tombstones_are_cleared() {
        let repo = Arc::new(InMemoryRepository::new());
        let keys = GcConfig::default().keys;
        put(&repo, &keys.tombstone_key(), b"left by an interrupted remove");
        let report = collector(&repo).collect(Vec::new()).unwrap();
        assert_eq!(report.tombstoned, 0);
        assert_eq!(report.deleted, 1);
        assert!(repo.is_empty());
    }

    #[test]
    fn duplicates_of_an_unlisted_blob_are_all_reclaimed() {
        let repo = Arc::new(InMemoryRepository::without_unique_index());
        let keys = GcConfig::default().keys;
        let key = keys.blob_key(&ContentHash::of(b"dup"));
        put(&repo, &key, b"dup");
        put(&repo, &key, b"dup");
        let cutoff = Utc::now() + Duration::seconds(60);
        let report = collector(&repo).collect_before(Vec::new(), cutoff).unwrap();
        // The first record is tombstoned, so the second stands in for it.
        assert_eq!(report.duplicates, 0);
        assert_eq!(report.tombstoned, 2);
        assert_eq!(report.deleted, 2);
        assert!(repo.is_empty());
    }

    #[test]
    fn merge_moves_references_to_survivor() {
        let repo = Arc::new(InMemoryRepository::without_unique_index());
        let first = {
            let mut w = repo.create("blob-k").unwrap();
            w.write_all(b"k").unwrap();
            w.commit(RefState::first_reference(Generation::ZERO)).unwrap()
        };
        let mut w = repo.create("blob-k").unwrap();
        w.write_all(b"k").unwrap();
        let mut state = RefState::first_reference(Generation::ZERO);
        state.ref_count = 3;
        let dup = w.commit(state).unwrap();

        let gc = collector(&repo);
        assert!(matches!(gc.merge_duplicate(&dup, first.id).unwrap(), Merge::Folded { deleted: true }));
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.stat("blob-k").unwrap().unwrap().ref_count, 4);
        // A second attempt finds nothing left to move.
        assert!(matches!(gc.merge_duplicate(&dup, first.id).unwrap(), Merge::Vanished));
        assert_eq!(repo.stat("blob-k").unwrap().unwrap().ref_count, 4);
    }

    #[test]
    fn merge_keeps_references_when_survivor_is_gone() {
        let repo = Arc::new(InMemoryRepository::without_unique_index());
        let first = {
            let mut w = repo.create("blob-k").unwrap();
            w.write_all(b"k").unwrap();
            w.commit(RefState::first_reference(Generation::ZERO)).unwrap()
        };
        let mut w = repo.create("blob-k").unwrap();
        w.write_all(b"k").unwrap();
        let dup = w.commit(RefState::first_reference(Generation::ZERO)).unwrap();
        assert!(repo.delete_record(first.id).unwrap());

        let gc = collector(&repo);
        assert!(matches!(gc.merge_duplicate(&dup, first.id).unwrap(), Merge::SurvivorGone));
        let rec = repo.stat("blob-k").unwrap().unwrap();
        assert_eq!(rec.id, dup.id);
        assert_eq!(rec.ref_count, 1);
    }

    #[test]
    fn generations_advance_per_pass() {
        let repo = Arc::new(InMemoryRepository::new());
        let gc = collector(&repo);
        for i in 0..3 {
            assert_eq!(gc.collect(Vec::new()).unwrap().generation, Generation(i));
        }
        assert_eq!(gc.generations().current().unwrap(), Generation(3));
    }
}
