//! Content-addressed, deduplicating blob store.
//!
//! Identical byte sequences are stored once no matter how many owners
//! reference them. A [`DedupStore`] sits on top of any
//! [`BackingRepository`](blob_repo::BackingRepository) and derives all of its
//! atomicity from the repository's conditional primitives; it holds no locks
//! of its own, so any number of threads and processes may share one backend.
//!
//! # Operations
//!
//! - [`DedupStore::create`] -- create-or-increment, verifying the claimed hash
//! - [`DedupStore::open`] -- seekable reader over stored bytes
//! - [`DedupStore::check`] -- existence and size probe
//! - [`DedupStore::remove`] -- decrement-or-delete via a conditional rename
//!
//! # Guarantees
//!
//! 1. Bytes become visible under a hash only after they verified against it.
//! 2. Concurrent creates of the same hash converge on one physical blob.
//! 3. A blob is only deleted after a rename gated on a zero reference count.

pub mod config;
pub mod error;
pub mod store;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use store::DedupStore;
