//! Build configuration for `kiln.toml`.
//!
//! # Module Structure
//!
//! ```text
//! config/
//! ├── section/       # Configuration section definitions
//! │   ├── cache      # [cache]
//! │   └── resolver   # [resolver]
//! ├── error          # ConfigError
//! └── mod.rs         # BuildConfig (this file)
//! ```
//!
//! # Sections
//!
//! | Section       | Purpose                                              |
//! |---------------|------------------------------------------------------|
//! | `[cache]`     | Cache root and storage layout                        |
//! | `[resolver]`  | Extension lists, compilation roots, builtin names    |

mod error;
pub mod section;

pub use error::ConfigError;
pub use section::{CacheConfig, ResolverConfig, dotted_extension, has_extension};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::log;

/// Default config file name.
pub const CONFIG_FILE: &str = "kiln.toml";

/// Root configuration structure representing kiln.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Absolute path to the config file (internal use only)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Resolver settings
    #[serde(default)]
    pub resolver: ResolverConfig,
}

impl BuildConfig {
    /// Load, resolve relative paths against the file's directory, and validate.
    ///
    /// Unknown fields are reported but do not abort loading.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;

        let (mut config, ignored) = Self::parse_with_ignored(&content)?;
        for field in &ignored {
            log!("config"; "unknown field `{}` in {}", field, path.display());
        }

        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let base = std::path::absolute(&base).map_err(|err| ConfigError::Io(base, err))?;

        config.config_path = base.join(path.file_name().unwrap_or(std::ffi::OsStr::new(CONFIG_FILE)));
        config.resolve_paths(&base);
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without touching the filesystem. Paths stay as written.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })?;
        Ok((config, ignored))
    }

    /// Make `cache.root` and `resolver.compilation_roots` absolute against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let absolutize = |path: &Path| crate::fs::clean_path(&base.join(path));

        self.cache.root = absolutize(&self.cache.root);
        self.resolver.compilation_roots = self
            .resolver
            .compilation_roots
            .iter()
            .map(|root| absolutize(root))
            .collect();
    }

    /// Reject configurations the resolver cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let resolver = &self.resolver;

        if resolver.extensions.is_empty() {
            return Err(ConfigError::Validation(
                "resolver.extensions must not be empty".into(),
            ));
        }

        let lists = [
            ("extensions", &resolver.extensions),
            ("passthrough", &resolver.passthrough),
            ("force_compile", &resolver.force_compile),
            ("esm_extensions", &resolver.esm_extensions),
            ("cjs_extensions", &resolver.cjs_extensions),
            ("native_extensions", &resolver.native_extensions),
        ];
        for (name, list) in lists {
            if let Some(ext) = list.iter().find(|ext| !ext.starts_with('.')) {
                return Err(ConfigError::Validation(format!(
                    "resolver.{name}: `{ext}` must start with `.`"
                )));
            }
        }

        if let Some(root) = resolver.compilation_roots.iter().find(|r| !r.is_absolute()) {
            return Err(ConfigError::Validation(format!(
                "resolver.compilation_roots: `{}` is not absolute",
                root.display()
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Test Helpers (available to all modules via `use crate::config::test_*`)
// ============================================================================

/// Parse config, panicking on unknown fields (to catch config typos in tests).
#[cfg(test)]
pub fn test_parse_config(content: &str) -> BuildConfig {
    let (parsed, ignored) = BuildConfig::parse_with_ignored(content).unwrap();
    assert!(
        ignored.is_empty(),
        "test config has unknown fields: {:?}",
        ignored
    );
    parsed
}
