use async_trait::async_trait;

use crate::error::{VfsError, VfsResult};
use crate::info::InfoRecord;
use crate::walk;

/// Capabilities a filesystem declares up front.
///
/// Callers query these flags instead of probing methods at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub write: bool,
    pub make_dirs: bool,
    pub remove: bool,
}

impl Capabilities {
    pub const READ_ONLY: Self = Self {
        write: false,
        make_dirs: false,
        remove: false,
    };

    pub const READ_WRITE: Self = Self {
        write: true,
        make_dirs: true,
        remove: true,
    };
}

/// Result of a `list`/`glob` call with an explicit detail flag.
#[derive(Debug, Clone, PartialEq)]
pub enum Listing {
    Detailed(Vec<InfoRecord>),
    Names(Vec<String>),
}

impl Listing {
    pub fn new(records: Vec<InfoRecord>, detail: bool) -> Self {
        if detail {
            Self::Detailed(records)
        } else {
            Self::Names(records.into_iter().map(|r| r.name).collect())
        }
    }

    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::Detailed(records) => records.iter().map(|r| r.name.as_str()).collect(),
            Self::Names(names) => names.iter().map(String::as_str).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Detailed(records) => records.len(),
            Self::Names(names) => names.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Filesystem capability contract - every backend goes through this
///
/// Paths are slash-delimited strings interpreted by the backend. Info records
/// carry the full entry path in `name`.
///
/// Default implementations return `Unsupported` for optional mutations,
/// allowing backends to implement only what they support. Query
/// [`capabilities`](Filesystem::capabilities) rather than calling and catching.
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Backend identity used in error context and logs
    fn name(&self) -> &str;

    /// List a directory. Listing a file yields a single record for that file.
    async fn list(&self, path: &str) -> VfsResult<Vec<InfoRecord>>;

    /// Get file/directory metadata; `NotFound` if absent
    async fn info(&self, path: &str) -> VfsResult<InfoRecord>;

    /// Read entire file contents
    async fn read_all(&self, path: &str) -> VfsResult<Vec<u8>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Optional operations with default implementations
    // ─────────────────────────────────────────────────────────────────────────

    fn capabilities(&self) -> Capabilities {
        Capabilities::READ_ONLY
    }

    /// Write entire file contents (create or overwrite)
    async fn write_all(&self, _path: &str, _data: &[u8]) -> VfsResult<()> {
        Err(VfsError::unsupported("write", self.name()))
    }

    /// Create a directory and all parents
    async fn make_dirs(&self, _path: &str, _exist_ok: bool) -> VfsResult<()> {
        Err(VfsError::unsupported("make_dirs", self.name()))
    }

    /// Remove a file or an empty directory
    async fn remove(&self, _path: &str) -> VfsResult<()> {
        Err(VfsError::unsupported("remove", self.name()))
    }

    /// Read at most `len` leading bytes (used for content probing)
    async fn read_prefix(&self, path: &str, len: usize) -> VfsResult<Vec<u8>> {
        let mut data = self.read_all(path).await?;
        data.truncate(len);
        Ok(data)
    }

    async fn exists(&self, path: &str) -> VfsResult<bool> {
        match self.info(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn is_file(&self, path: &str) -> VfsResult<bool> {
        match self.info(path).await {
            Ok(info) => Ok(info.is_file()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn is_dir(&self, path: &str) -> VfsResult<bool> {
        match self.info(path).await {
            Ok(info) => Ok(info.is_dir()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Names of the entries below `path`
    async fn list_names(&self, path: &str) -> VfsResult<Vec<String>> {
        Ok(self.list(path).await?.into_iter().map(|r| r.name).collect())
    }

    /// List with an explicit detail flag
    async fn ls(&self, path: &str, detail: bool) -> VfsResult<Listing> {
        Ok(Listing::new(self.list(path).await?, detail))
    }

    /// Match a glob pattern against every path below its literal prefix
    async fn glob(&self, pattern: &str, detail: bool) -> VfsResult<Listing> {
        let records = walk::glob(self, pattern).await?;
        Ok(Listing::new(records, detail))
    }
}
