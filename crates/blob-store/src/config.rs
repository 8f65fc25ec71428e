use blob_crypto::DEFAULT_BUFFER_SIZE;
use blob_repo::KeyLayout;
use serde::{Deserialize, Serialize};

/// Settings for a [`DedupStore`](crate::DedupStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How hashes map onto repository keys. Must match the collector's.
    pub keys: KeyLayout,
    /// Buffer used when streaming a reader into the repository.
    pub copy_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            keys: KeyLayout::default(),
            copy_buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl StoreConfig {
    /// Parse from TOML; missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = StoreConfig::default();
        assert_eq!(c.copy_buffer_size, 64 * 1024);
        assert_eq!(c.keys.blob_prefix, "blob-");
        assert_eq!(c.keys.tombstone_prefix, "tombstone-");
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(StoreConfig::from_toml_str("").unwrap(), StoreConfig::default());
    }

    #[test]
    fn toml_overrides() {
        let c = StoreConfig::from_toml_str(
            r#"
            copy_buffer_size = 4096

            [keys]
            blob_prefix = "cas-"
            "#,
        )
        .unwrap();
        assert_eq!(c.copy_buffer_size, 4096);
        assert_eq!(c.keys.blob_prefix, "cas-");
        assert_eq!(c.keys.generation_counter, "gc-generation");
    }
}
