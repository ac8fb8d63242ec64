//! In-memory filesystem provider.
//!
//! Mtimes come from a logical clock that advances on every write, so two
//! writes never share a timestamp. Tests drive freshness through
//! [`MemoryFs::touch`] and [`MemoryFs::set_mtime`].

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::{FileStat, FileSystem, Mtime, clean_path};

/// Maximum symlink hops before reporting a loop.
const MAX_SYMLINK_HOPS: usize = 40;

#[derive(Debug, Clone)]
enum Node {
    File { data: Vec<u8>, mtime: Mtime },
    Dir { mtime: Mtime },
    Symlink { target: PathBuf },
}

#[derive(Debug)]
struct MemoryState {
    nodes: FxHashMap<PathBuf, Node>,
    clock: Mtime,
}

impl MemoryState {
    fn tick(&mut self) -> Mtime {
        self.clock += 1;
        self.clock
    }

    /// Follow symlinks in every component of `path`.
    fn resolve(&self, path: &Path) -> io::Result<PathBuf> {
        let mut current = clean_path(path);
        let mut hops = 0;

        'restart: loop {
            let mut resolved = PathBuf::new();
            let components: Vec<Component> = current.components().collect();

            for (i, component) in components.iter().enumerate() {
                resolved.push(component.as_os_str());
                let Some(Node::Symlink { target }) = self.nodes.get(&resolved) else {
                    continue;
                };

                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(io::Error::other(format!(
                        "too many levels of symbolic links: {}",
                        path.display()
                    )));
                }
                let base = resolved.parent().map(Path::to_path_buf).unwrap_or_default();
                let mut next = base.join(target);
                for rest in &components[i + 1..] {
                    next.push(rest.as_os_str());
                }
                current = clean_path(&next);
                continue 'restart;
            }
            return Ok(resolved);
        }
    }

    fn get(&self, path: &Path) -> io::Result<(PathBuf, &Node)> {
        let resolved = self.resolve(path)?;
        match self.nodes.get(&resolved) {
            Some(node) => Ok((resolved, node)),
            None => Err(not_found(path)),
        }
    }

    fn is_dir(&self, path: &Path) -> bool {
        is_root(path) || matches!(self.nodes.get(path), Some(Node::Dir { .. }))
    }

    fn children(&self, dir: &Path) -> Vec<PathBuf> {
        self.nodes
            .keys()
            .filter(|p| p.as_path() != dir && p.starts_with(dir))
            .cloned()
            .collect()
    }

    fn ensure_parent(&self, path: &Path) -> io::Result<()> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !self.is_dir(parent) => {
                Err(not_found(parent))
            }
            _ => Ok(()),
        }
    }

    fn mkdir_all(&mut self, path: &Path) {
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component.as_os_str());
            if is_root(&current) || self.nodes.contains_key(&current) {
                continue;
            }
            let mtime = self.tick();
            self.nodes.insert(current.clone(), Node::Dir { mtime });
        }
    }
}

/// [`FileSystem`] held entirely in memory.
#[derive(Debug)]
pub struct MemoryFs {
    state: Mutex<MemoryState>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                nodes: FxHashMap::default(),
                clock: 1_000,
            }),
        }
    }

    /// Create a file and any missing parent directories.
    pub fn insert(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Mtime {
        let path = clean_path(path.as_ref());
        let mut state = self.state.lock();
        if let Some(parent) = path.parent() {
            state.mkdir_all(parent);
        }
        let mtime = state.tick();
        state.nodes.insert(
            path,
            Node::File {
                data: contents.as_ref().to_vec(),
                mtime,
            },
        );
        mtime
    }

    /// Create a symlink at `link` pointing to `target` (relative to the link's directory).
    pub fn symlink(&self, link: impl AsRef<Path>, target: impl AsRef<Path>) {
        let link = clean_path(link.as_ref());
        let mut state = self.state.lock();
        if let Some(parent) = link.parent() {
            state.mkdir_all(parent);
        }
        state.nodes.insert(
            link,
            Node::Symlink {
                target: target.as_ref().to_path_buf(),
            },
        );
    }

    /// Advance a file's mtime without changing its contents.
    pub fn touch(&self, path: impl AsRef<Path>) -> io::Result<Mtime> {
        let mut state = self.state.lock();
        let resolved = state.resolve(path.as_ref())?;
        let next = state.tick();
        match state.nodes.get_mut(&resolved) {
            Some(Node::File { mtime, .. } | Node::Dir { mtime }) => {
                *mtime = next;
                Ok(next)
            }
            _ => Err(not_found(path.as_ref())),
        }
    }

    /// Force a file's mtime.
    pub fn set_mtime(&self, path: impl AsRef<Path>, value: Mtime) -> io::Result<()> {
        let mut state = self.state.lock();
        let resolved = state.resolve(path.as_ref())?;
        match state.nodes.get_mut(&resolved) {
            Some(Node::File { mtime, .. } | Node::Dir { mtime }) => {
                *mtime = value;
                Ok(())
            }
            _ => Err(not_found(path.as_ref())),
        }
    }

    /// Number of regular files stored.
    pub fn file_count(&self) -> usize {
        self.state
            .lock()
            .nodes
            .values()
            .filter(|node| matches!(node, Node::File { .. }))
            .count()
    }
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for MemoryFs {
    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        let state = self.state.lock();
        match state.get(path)? {
            (_, Node::File { data, .. }) => Ok(data.clone()),
            _ => Err(io::Error::other(format!("is a directory: {}", path.display()))),
        }
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        let resolved = state.resolve(path)?;
        state.ensure_parent(&resolved)?;
        if state.is_dir(&resolved) {
            return Err(io::Error::other(format!("is a directory: {}", path.display())));
        }
        let mtime = state.tick();
        state.nodes.insert(
            resolved,
            Node::File {
                data: contents.to_vec(),
                mtime,
            },
        );
        Ok(())
    }

    async fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let state = self.state.lock();
        if is_root(&clean_path(path)) {
            return Ok(FileStat {
                mtime: 0,
                is_dir: true,
                len: 0,
            });
        }
        match state.get(path)? {
            (_, Node::File { data, mtime }) => Ok(FileStat {
                mtime: *mtime,
                is_dir: false,
                len: data.len() as u64,
            }),
            (_, Node::Dir { mtime }) => Ok(FileStat {
                mtime: *mtime,
                is_dir: true,
                len: 0,
            }),
            // resolve() never stops on a symlink
            (_, Node::Symlink { .. }) => Err(not_found(path)),
        }
    }

    async fn mkdir(&self, path: &Path, recursive: bool) -> io::Result<()> {
        let mut state = self.state.lock();
        let resolved = state.resolve(path)?;
        if recursive {
            state.mkdir_all(&resolved);
            return Ok(());
        }
        if state.nodes.contains_key(&resolved) || is_root(&resolved) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("already exists: {}", path.display()),
            ));
        }
        state.ensure_parent(&resolved)?;
        let mtime = state.tick();
        state.nodes.insert(resolved, Node::Dir { mtime });
        Ok(())
    }

    async fn rm(&self, path: &Path, recursive: bool, force: bool) -> io::Result<()> {
        let mut state = self.state.lock();
        let target = clean_path(path);
        let is_dir = match state.nodes.get(&target) {
            None if force => return Ok(()),
            None => return Err(not_found(path)),
            Some(node) => matches!(node, Node::Dir { .. }),
        };

        if is_dir {
            let children = state.children(&target);
            if !children.is_empty() && !recursive {
                return Err(io::Error::other(format!(
                    "directory not empty: {}",
                    path.display()
                )));
            }
            for child in children {
                state.nodes.remove(&child);
            }
        }
        state.nodes.remove(&target);
        Ok(())
    }

    async fn unlink(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state.lock();
        let target = clean_path(path);
        match state.nodes.get(&target) {
            None => return Err(not_found(path)),
            Some(Node::Dir { .. }) => {
                return Err(io::Error::other(format!(
                    "is a directory: {}",
                    path.display()
                )));
            }
            Some(_) => {}
        }
        state.nodes.remove(&target);
        Ok(())
    }

    async fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        let state = self.state.lock();
        if is_root(&clean_path(path)) {
            return Ok(clean_path(path));
        }
        state.get(path).map(|(resolved, _)| resolved)
    }
}

fn is_root(path: &Path) -> bool {
    path.parent().is_none() && path.has_root()
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such file or directory: {}", path.display()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_read() {
        let fs = MemoryFs::new();
        fs.insert("/site/src/a.js", "export default 1");

        let data = fs.read_to_string(Path::new("/site/src/a.js")).await.unwrap();
        assert_eq!(data, "export default 1");
        assert!(fs.stat(Path::new("/site/src")).await.unwrap().is_dir);
    }

    #[tokio::test]
    async fn test_write_requires_parent() {
        let fs = MemoryFs::new();
        let err = fs
            .write_file(Path::new("/missing/file"), b"x")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        fs.mkdir(Path::new("/missing"), false).await.unwrap();
        fs.write_file(Path::new("/missing/file"), b"x").await.unwrap();
    }

    #[tokio::test]
    async fn test_mtime_advances() {
        let fs = MemoryFs::new();
        let first = fs.insert("/a", "1");
        let touched = fs.touch("/a").unwrap();
        assert!(touched > first);
        assert_eq!(fs.stat(Path::new("/a")).await.unwrap().mtime, touched);

        fs.set_mtime("/a", 42).unwrap();
        assert_eq!(fs.stat(Path::new("/a")).await.unwrap().mtime, 42);
    }

    #[tokio::test]
    async fn test_symlink_canonicalize() {
        let fs = MemoryFs::new();
        fs.insert("/pkg/real/index.js", "x");
        fs.symlink("/node_modules/linked", "../pkg/real");

        let canonical = fs
            .canonicalize(Path::new("/node_modules/linked/index.js"))
            .await
            .unwrap();
        assert_eq!(canonical, PathBuf::from("/pkg/real/index.js"));

        let data = fs
            .read_file(Path::new("/node_modules/linked/index.js"))
            .await
            .unwrap();
        assert_eq!(data, b"x");
    }

    #[tokio::test]
    async fn test_symlink_loop() {
        let fs = MemoryFs::new();
        fs.symlink("/a", "/b");
        fs.symlink("/b", "/a");
        assert!(fs.canonicalize(Path::new("/a/file")).await.is_err());
    }

    #[tokio::test]
    async fn test_rm_directory() {
        let fs = MemoryFs::new();
        fs.insert("/cache/x/1", "1");
        fs.insert("/cache/y", "2");

        assert!(fs.rm(Path::new("/cache"), false, false).await.is_err());
        fs.rm(Path::new("/cache"), true, false).await.unwrap();
        assert_eq!(fs.file_count(), 0);
        assert!(!fs.exists(Path::new("/cache/y")).await);

        fs.rm(Path::new("/cache"), true, true).await.unwrap();
        assert!(fs.rm(Path::new("/cache"), true, false).await.is_err());
    }

    #[tokio::test]
    async fn test_unlink() {
        let fs = MemoryFs::new();
        fs.insert("/f", "1");
        fs.unlink(Path::new("/f")).await.unwrap();
        assert!(fs.unlink(Path::new("/f")).await.is_err());
    }
}
