use std::io::{self, Read, Write};

use blob_types::ContentHash;
use sha2::{Digest, Sha256};

/// Default copy buffer: 64 KiB.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Errors from hash verification.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The bytes did not hash to the claimed value.
    #[error("file checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        expected: ContentHash,
        actual: ContentHash,
    },

    /// Reading from the source failed.
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    /// Writing to the destination failed.
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
}

/// Streaming sha-256 accumulator bound to an expected hash.
///
/// Memory use is bounded by the copy buffer regardless of input size.
pub struct HashVerifier {
    expected: ContentHash,
    hasher: Sha256,
    buffer_size: usize,
    bytes: u64,
}

impl HashVerifier {
    pub fn new(expected: ContentHash) -> Self {
        Self::with_buffer_size(expected, DEFAULT_BUFFER_SIZE)
    }

    /// Use a specific copy buffer size (clamped to at least 1 byte).
    pub fn with_buffer_size(expected: ContentHash, buffer_size: usize) -> Self {
        Self {
            expected,
            hasher: Sha256::new(),
            buffer_size: buffer_size.max(1),
            bytes: 0,
        }
    }

    /// Copy everything from `src` into `dst`, hashing along the way.
    ///
    /// Every byte read is written, mismatch or not; the caller discards the
    /// destination if [`finish`](Self::finish) fails.
    pub fn copy<R: Read + ?Sized, W: Write + ?Sized>(
        &mut self,
        src: &mut R,
        dst: &mut W,
    ) -> Result<u64, VerifyError> {
        let mut buf = vec![0u8; self.buffer_size];
        let mut copied = 0u64;
        loop {
            let n = match src.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(VerifyError::Read(e)),
            };
            self.hasher.update(&buf[..n]);
            dst.write_all(&buf[..n]).map_err(VerifyError::Write)?;
            copied += n as u64;
        }
        self.bytes += copied;
        Ok(copied)
    }

    /// Number of bytes hashed so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Compare the accumulated digest with the expected hash.
    ///
    /// Returns the total byte count on success.
    pub fn finish(self) -> Result<u64, VerifyError> {
        let actual = ContentHash::from_digest(self.hasher.finalize().into());
        if actual != self.expected {
            return Err(VerifyError::ChecksumMismatch {
                expected: self.expected,
                actual,
            });
        }
        Ok(self.bytes)
    }
}

/// Copy `src` into `dst` and check that the bytes hash to `expected`.
pub fn copy_and_verify<R: Read + ?Sized, W: Write + ?Sized>(
    dst: &mut W,
    src: &mut R,
    expected: &ContentHash,
) -> Result<u64, VerifyError> {
    copy_and_verify_buffered(dst, src, expected, DEFAULT_BUFFER_SIZE)
}

/// [`copy_and_verify`] with an explicit copy buffer size.
pub fn copy_and_verify_buffered<R: Read + ?Sized, W: Write + ?Sized>(
    dst: &mut W,
    src: &mut R,
    expected: &ContentHash,
    buffer_size: usize,
) -> Result<u64, VerifyError> {
    let mut verifier = HashVerifier::with_buffer_size(expected.clone(), buffer_size);
    verifier.copy(src, dst)?;
    verifier.finish()
}

/// Hash `src` without keeping the bytes.
pub fn verify_reader<R: Read + ?Sized>(src: &mut R, expected: &ContentHash) -> Result<u64, VerifyError> {
    copy_and_verify(&mut io::sink(), src, expected)
}

/// Hash everything `src` yields, returning the digest and byte count.
pub fn hash_reader<R: Read + ?Sized>(src: &mut R) -> io::Result<(ContentHash, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((ContentHash::from_digest(hasher.finalize().into()), total))
}
