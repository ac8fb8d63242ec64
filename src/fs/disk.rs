//! Real filesystem provider.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;

use super::{FileStat, FileSystem, Mtime};

/// [`FileSystem`] backed by `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskFs;

#[async_trait]
impl FileSystem for DiskFs {
    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        tokio::fs::write(path, contents).await
    }

    async fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = tokio::fs::metadata(path).await?;
        Ok(FileStat {
            mtime: to_millis(meta.modified()?),
            is_dir: meta.is_dir(),
            len: meta.len(),
        })
    }

    async fn mkdir(&self, path: &Path, recursive: bool) -> io::Result<()> {
        if recursive {
            tokio::fs::create_dir_all(path).await
        } else {
            tokio::fs::create_dir(path).await
        }
    }

    async fn rm(&self, path: &Path, recursive: bool, force: bool) -> io::Result<()> {
        let result = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) if meta.is_dir() && recursive => tokio::fs::remove_dir_all(path).await,
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir(path).await,
            Ok(_) => tokio::fs::remove_file(path).await,
            Err(e) => Err(e),
        };
        match result {
            Err(e) if force && e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    async fn unlink(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        tokio::fs::canonicalize(path).await
    }
}

/// Convert a `SystemTime` to milliseconds since the Unix epoch.
pub(crate) fn to_millis(time: SystemTime) -> Mtime {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as Mtime)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_read_stat() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        let fs = DiskFs;

        fs.write_file(&path, b"hello").await.unwrap();
        assert_eq!(fs.read_file(&path).await.unwrap(), b"hello");

        let stat = fs.stat(&path).await.unwrap();
        assert!(!stat.is_dir);
        assert_eq!(stat.len, 5);
        assert!(stat.mtime > 0);
    }

    #[tokio::test]
    async fn test_rm_recursive_and_force() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("x/y");
        let fs = DiskFs;

        fs.mkdir(&nested, true).await.unwrap();
        fs.write_file(&nested.join("f"), b"1").await.unwrap();

        assert!(fs.rm(&dir.path().join("x"), false, false).await.is_err());
        fs.rm(&dir.path().join("x"), true, false).await.unwrap();
        assert!(!fs.exists(&nested).await);

        // Missing path: error without force, ok with force
        assert!(fs.rm(&nested, true, false).await.is_err());
        fs.rm(&nested, true, true).await.unwrap();
    }
}
