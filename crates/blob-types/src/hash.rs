use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::TypeError;

/// Number of hex characters in a sha-256 digest.
pub const HASH_HEX_LEN: usize = 64;

/// Hex-encoded sha-256 digest of a blob's bytes.
///
/// A `ContentHash` is the only external identity of a blob. It is always
/// stored in canonical form: exactly 64 lowercase hex characters.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Compute the content hash of `data`.
    pub fn of(data: &[u8]) -> Self {
        Self::from_digest(Sha256::digest(data).into())
    }

    /// Wrap a raw 32-byte sha-256 digest.
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(hex::encode(digest))
    }

    /// Parse a hex digest, accepting either case.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        if s.len() != HASH_HEX_LEN {
            return Err(TypeError::InvalidHash {
                value: s.to_string(),
                reason: format!("expected {HASH_HEX_LEN} hex characters, got {}", s.len()),
            });
        }
        if let Some(c) = s.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidHash {
                value: s.to_string(),
                reason: format!("non-hex character {c:?}"),
            });
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// The canonical lowercase hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short hex representation (first 8 characters), for logs.
    pub fn short_hex(&self) -> &str {
        &self.0[..8]
    }

    /// Decode back into the raw digest bytes.
    pub fn to_digest(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        // Canonical form is validated at construction.
        if hex::decode_to_slice(&self.0, &mut out).is_err() {
            unreachable!("ContentHash always holds valid hex");
        }
        out
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
