//! Foundation types for the deduplicating blob store.
//!
//! Every other crate in the workspace depends on `blob-types`. Blobs are
//! addressed purely by the sha-256 digest of their bytes; nothing outside the
//! store ever names a blob any other way.
//!
//! # Key Types
//!
//! - [`ContentHash`] -- validated, lowercase hex sha-256 digest
//! - [`Generation`] -- monotonically increasing garbage-collection epoch

pub mod error;
pub mod generation;
pub mod hash;

pub use error::TypeError;
pub use generation::Generation;
pub use hash::ContentHash;
