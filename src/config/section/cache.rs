//! `[cache]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [cache]
//! root = ".kiln/cache"    # Cache root, relative to the config file
//! layout = "direct"       # direct | hashed
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cache::StorageLayout;

/// Persisted cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root directory.
    pub root: PathBuf,

    /// How keys map onto files under `root`.
    /// - `direct` (default): mirror the key's path
    /// - `hashed`: blake3-sharded flat layout
    pub layout: StorageLayout,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".kiln/cache"),
            layout: StorageLayout::Direct,
        }
    }
}
