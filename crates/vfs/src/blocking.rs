//! Synchronous facade over any async [`Filesystem`].
//!
//! `BlockingFs` owns a current-thread runtime and drives each call to
//! completion on it. Must not be used from inside an async context; tokio
//! panics when a runtime is entered from a runtime thread.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use crate::backend::{Capabilities, Filesystem, Listing};
use crate::error::{VfsError, VfsResult};
use crate::info::InfoRecord;
use crate::walk;

pub struct BlockingFs {
    fs: Arc<dyn Filesystem>,
    runtime: Runtime,
}

impl BlockingFs {
    pub fn new(fs: Arc<dyn Filesystem>) -> VfsResult<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| VfsError::other(format!("failed to start runtime: {e}")))?;
        Ok(Self { fs, runtime })
    }

    /// The wrapped async filesystem
    pub fn inner(&self) -> &Arc<dyn Filesystem> {
        &self.fs
    }

    /// Run any future against this facade's runtime
    pub fn block_on<T>(&self, fut: impl Future<Output = T>) -> T {
        self.runtime.block_on(fut)
    }

    pub fn name(&self) -> &str {
        self.fs.name()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.fs.capabilities()
    }

    pub fn list(&self, path: &str) -> VfsResult<Vec<InfoRecord>> {
        self.block_on(self.fs.list(path))
    }

    pub fn ls(&self, path: &str, detail: bool) -> VfsResult<Listing> {
        self.block_on(self.fs.ls(path, detail))
    }

    pub fn info(&self, path: &str) -> VfsResult<InfoRecord> {
        self.block_on(self.fs.info(path))
    }

    pub fn read_all(&self, path: &str) -> VfsResult<Vec<u8>> {
        self.block_on(self.fs.read_all(path))
    }

    pub fn read_prefix(&self, path: &str, len: usize) -> VfsResult<Vec<u8>> {
        self.block_on(self.fs.read_prefix(path, len))
    }

    pub fn write_all(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        self.block_on(self.fs.write_all(path, data))
    }

    pub fn make_dirs(&self, path: &str, exist_ok: bool) -> VfsResult<()> {
        self.block_on(self.fs.make_dirs(path, exist_ok))
    }

    pub fn remove(&self, path: &str) -> VfsResult<()> {
        self.block_on(self.fs.remove(path))
    }

    pub fn exists(&self, path: &str) -> VfsResult<bool> {
        self.block_on(self.fs.exists(path))
    }

    pub fn is_file(&self, path: &str) -> VfsResult<bool> {
        self.block_on(self.fs.is_file(path))
    }

    pub fn is_dir(&self, path: &str) -> VfsResult<bool> {
        self.block_on(self.fs.is_dir(path))
    }

    pub fn glob(&self, pattern: &str, detail: bool) -> VfsResult<Listing> {
        self.block_on(self.fs.glob(pattern, detail))
    }

    pub fn walk(&self, root: &str, max_depth: Option<usize>) -> VfsResult<Vec<InfoRecord>> {
        self.block_on(walk::walk(self.fs.as_ref(), root, max_depth))
    }

    pub fn remove_tree(&self, path: &str) -> VfsResult<()> {
        self.block_on(walk::remove_tree(self.fs.as_ref(), path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryFs;

    #[test]
    fn test_sync_surface() {
        let fs = BlockingFs::new(Arc::new(MemoryFs::new())).unwrap();
        fs.write_all("/docs/a.md", b"# a").unwrap();
        fs.write_all("/docs/b.txt", b"b").unwrap();

        assert_eq!(fs.read_all("/docs/a.md").unwrap(), b"# a");
        assert!(fs.is_dir("/docs").unwrap());
        assert!(!fs.exists("/docs/c").unwrap());
        assert_eq!(fs.glob("/docs/*.md", false).unwrap().names(), vec!["/docs/a.md"]);
        assert_eq!(fs.walk("/", None).unwrap().len(), 3);

        fs.remove_tree("/docs").unwrap();
        assert!(!fs.exists("/docs").unwrap());
    }
}
