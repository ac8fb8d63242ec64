//! Filesystem providers.
//!
//! The cache and the resolver never touch the disk directly; they go through
//! [`FileSystem`]. Any object implementing this small surface works:
//!
//! - [`DiskFs`]: the real filesystem via `tokio::fs`
//! - [`MemoryFs`]: an in-memory tree with settable mtimes and symlinks

mod disk;
mod memory;

pub use disk::DiskFs;
pub use memory::MemoryFs;

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Modification time in milliseconds since the Unix epoch.
pub type Mtime = u64;

/// Subset of file metadata the build pipeline cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub mtime: Mtime,
    pub is_dir: bool,
    pub len: u64,
}

/// Abstract filesystem interface.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Write `contents`, replacing any existing file. The parent must exist.
    async fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    async fn stat(&self, path: &Path) -> io::Result<FileStat>;

    async fn mkdir(&self, path: &Path, recursive: bool) -> io::Result<()>;

    /// Remove a file or directory.
    ///
    /// `recursive` allows non-empty directories; `force` ignores missing paths.
    async fn rm(&self, path: &Path, recursive: bool, force: bool) -> io::Result<()>;

    async fn unlink(&self, path: &Path) -> io::Result<()>;

    /// Resolve symlinks and relative components. The path must exist.
    async fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;

    async fn exists(&self, path: &Path) -> bool {
        self.stat(path).await.is_ok()
    }

    async fn is_file(&self, path: &Path) -> bool {
        self.stat(path).await.is_ok_and(|stat| !stat.is_dir)
    }

    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let bytes = self.read_file(path).await?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Lexically normalize a path: drop `.`, fold `..` into the parent.
///
/// Does not touch the filesystem, so symlinks are not resolved.
pub fn clean_path(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(clean_path(Path::new("/a/b/..")), PathBuf::from("/a"));
        assert_eq!(clean_path(Path::new("a/../../b")), PathBuf::from("../b"));
    }
}
