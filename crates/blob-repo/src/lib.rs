//! Backing repository contract for the deduplicating blob store.
//!
//! The store layers deduplication and reference counting on top of a generic
//! record store. This crate defines the primitives that store must offer and
//! nothing more: the physical layout, indexing and network protocol of a real
//! backend are its own business.
//!
//! # Primitives
//!
//! - Staged writes with a single atomic visibility point ([`BlobWriter::commit`])
//! - Conditional increment and fetch-and-modify on reference state
//! - Conditional rename (the basis of two-phase, race-safe deletion)
//! - Sorted, paginated enumeration
//! - Durable named counters
//!
//! # Backends
//!
//! - [`InMemoryRepository`] -- `BTreeMap`-based reference implementation for
//!   tests, benchmarks and embedding
//!
//! # Design Rules
//!
//! 1. Nothing is visible under its key until `commit` returns `Ok`.
//! 2. Every conditional primitive is atomic with respect to every other.
//! 3. Failures are tagged [`RepoError`] variants; callers never inspect
//!    message text.

pub mod error;
pub mod keys;
pub mod memory;
pub mod record;
pub mod traits;

pub use error::{RepoError, RepoResult};
pub use keys::KeyLayout;
pub use memory::{InMemoryRepository, MemoryReader, MemoryWriter};
pub use record::{Condition, Filter, Mutation, Record, RecordId, RefState, ReturnDocument, Selector};
pub use traits::{BackingRepository, BlobWriter, RecordStream};
