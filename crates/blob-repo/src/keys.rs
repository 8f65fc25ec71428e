use blob_types::ContentHash;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maps content hashes onto repository keys.
///
/// Blob keys are `<blob_prefix><hex hash>`. Tombstones get a fresh
/// `<tombstone_prefix><uuid>` key each time, so concurrent deletions never
/// collide with each other or with live blobs. The GC generation lives in
/// the named counter `generation_counter`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyLayout {
    pub blob_prefix: String,
    pub tombstone_prefix: String,
    pub generation_counter: String,
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self {
            blob_prefix: "blob-".into(),
            tombstone_prefix: "tombstone-".into(),
            generation_counter: "gc-generation".into(),
        }
    }
}

impl KeyLayout {
    pub fn blob_key(&self, hash: &ContentHash) -> String {
        format!("{}{}", self.blob_prefix, hash)
    }

    /// Recover the hash from a blob key. Returns `None` for anything that is
    /// not a well-formed blob key.
    pub fn hash_from_key(&self, key: &str) -> Option<ContentHash> {
        let hex = key.strip_prefix(self.blob_prefix.as_str())?;
        ContentHash::parse(hex).ok()
    }

    pub fn tombstone_key(&self) -> String {
        format!("{}{}", self.tombstone_prefix, Uuid::now_v7())
    }

    pub fn is_tombstone(&self, key: &str) -> bool {
        key.starts_with(self.tombstone_prefix.as_str())
    }
}
