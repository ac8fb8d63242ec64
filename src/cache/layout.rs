//! Mapping from logical cache keys to physical storage paths.
//!
//! ```text
//! key: /site/src/index.js
//!
//! Direct  →  <root>/site/src/index.js
//! Hashed  →  <root>/3f/a91c...e07      (blake3 of the key, sharded by first byte)
//! ```
//!
//! Every payload has a timestamp sidecar next to it: `<payload>.stats`.

use std::ffi::OsString;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Suffix appended to a payload path for its timestamp sidecar.
pub const STATS_SUFFIX: &str = ".stats";

/// How logical keys are laid out under the cache root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageLayout {
    /// Mirror the key's path under the root.
    #[default]
    Direct,
    /// Content-hash the key into a flat, sharded directory.
    Hashed,
}

impl StorageLayout {
    /// Physical payload path for `key` under `root`.
    pub fn storage_path(self, root: &Path, key: &str) -> PathBuf {
        match self {
            Self::Direct => root.join(relative_key(key)),
            Self::Hashed => {
                let hash = KeyHash::of(key).to_hex();
                let (shard, rest) = hash.split_at(2);
                root.join(shard).join(rest)
            }
        }
    }
}

/// Timestamp sidecar path for a payload path.
pub fn stats_path(payload: &Path) -> PathBuf {
    let mut path = OsString::from(payload.as_os_str());
    path.push(STATS_SUFFIX);
    PathBuf::from(path)
}

/// Turn a key into a relative path that cannot escape the cache root.
fn relative_key(key: &str) -> PathBuf {
    Path::new(key)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

/// A 256-bit key hash (blake3 output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyHash([u8; 32]);

impl KeyHash {
    /// Hash a logical key.
    pub fn of(key: &str) -> Self {
        Self(*blake3::hash(key.as_bytes()).as_bytes())
    }

    /// Get the raw bytes.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 16 hex chars are enough to tell keys apart in logs
        write!(f, "{}", &self.to_hex()[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_layout_mirrors_key() {
        let path = StorageLayout::Direct.storage_path(Path::new("/cache"), "/site/src/a.js");
        assert_eq!(path, PathBuf::from("/cache/site/src/a.js"));
    }

    #[test]
    fn test_direct_layout_cannot_escape_root() {
        let path = StorageLayout::Direct.storage_path(Path::new("/cache"), "../../etc/passwd");
        assert_eq!(path, PathBuf::from("/cache/etc/passwd"));
    }

    #[test]
    fn test_hashed_layout_is_sharded() {
        let root = Path::new("/cache");
        let path = StorageLayout::Hashed.storage_path(root, "/site/src/a.js");

        let hash = KeyHash::of("/site/src/a.js").to_hex();
        assert_eq!(path, root.join(&hash[..2]).join(&hash[2..]));
        assert_eq!(path.parent().unwrap().parent().unwrap(), root);
    }

    #[test]
    fn test_hashed_layout_is_stable() {
        let root = Path::new("/cache");
        assert_eq!(
            StorageLayout::Hashed.storage_path(root, "k"),
            StorageLayout::Hashed.storage_path(root, "k")
        );
        assert_ne!(
            StorageLayout::Hashed.storage_path(root, "k"),
            StorageLayout::Hashed.storage_path(root, "k2")
        );
    }

    #[test]
    fn test_stats_path() {
        assert_eq!(
            stats_path(Path::new("/cache/a.js")),
            PathBuf::from("/cache/a.js.stats")
        );
    }

    #[test]
    fn test_key_hash_display() {
        let hash = KeyHash::of("abc");
        assert_eq!(format!("{hash}").len(), 16);
        assert_eq!(hash.as_bytes().len(), 32);
    }
}
