//! Hash verification for the deduplicating blob store.
//!
//! Blob bytes are never trusted on the caller's word. Every write is streamed
//! through a [`HashVerifier`], which hashes the data while copying it to its
//! destination and then compares the digest with the claimed
//! [`ContentHash`](blob_types::ContentHash).

pub mod verifier;

pub use verifier::{
    copy_and_verify, copy_and_verify_buffered, hash_reader, verify_reader, HashVerifier, VerifyError,
    DEFAULT_BUFFER_SIZE,
};
