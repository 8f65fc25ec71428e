//! Out-of-band garbage collection for the deduplicating blob store.
//!
//! Explicit reference counting breaks down when callers forget to remove, or
//! when liveness is decided by a secondary index rather than the store. The
//! [`GarbageCollector`] takes that index's word for it: it streams every live
//! [`ContentHash`](blob_types::ContentHash) into a [`BloomFilter`], then
//! sweeps the repository and deletes stale blobs the filter has never seen.
//!
//! # Safety Rules
//!
//! 1. The cutoff is fixed before the live set is read; anything referenced
//!    after it is exempt from the pass.
//! 2. The filter has no false negatives, so a live blob is never a candidate.
//! 3. Candidates are tombstoned by a rename gated on the cutoff, re-checked
//!    atomically, and only tombstones are ever deleted.
//! 4. Generations come from a durable counter and never repeat.

pub mod bloom;
pub mod collector;
pub mod config;
pub mod error;
pub mod generation;

pub use bloom::BloomFilter;
pub use collector::{GarbageCollector, GcReport};
pub use config::GcConfig;
pub use error::{GcError, GcResult};
pub use generation::GenerationCounter;
