//! Path handles and composite path syntax.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::backend::{Filesystem, Listing};
use crate::error::{VfsError, VfsResult};
use crate::info::InfoRecord;

/// Default composite separator between outer and inner path.
pub const DEFAULT_SEPARATOR: &str = "::";

/// Normalize path (ensure leading /, no trailing /, no empty or `.` segments)
pub fn normalize_path(path: &str) -> String {
    let parts: Vec<&str> = path
        .trim()
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    if parts.is_empty() {
        return "/".to_string();
    }
    format!("/{}", parts.join("/"))
}

/// Join a child onto a base path
pub fn join_path(base: &str, child: &str) -> String {
    if child.starts_with('/') {
        return child.to_string();
    }
    if base.is_empty() {
        return child.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), child)
}

/// A path split on the composite separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositePath<'a> {
    /// Resolved by the parent filesystem
    pub outer: &'a str,
    /// Interpreted by the sub-filesystem; empty means its root
    pub inner: &'a str,
}

/// Split at the first occurrence of `separator`. `None` for plain paths.
pub fn split_composite<'a>(path: &'a str, separator: &str) -> Option<CompositePath<'a>> {
    if separator.is_empty() {
        return None;
    }
    let idx = path.find(separator)?;
    Some(CompositePath {
        outer: &path[..idx],
        inner: &path[idx + separator.len()..],
    })
}

/// Immutable (filesystem, path) pair.
///
/// The handle shares the filesystem; it does not control its lifetime.
#[derive(Clone)]
pub struct VPath {
    fs: Arc<dyn Filesystem>,
    path: String,
}

impl fmt::Debug for VPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VPath")
            .field("fs", &self.fs.name())
            .field("path", &self.path)
            .finish()
    }
}

impl fmt::Display for VPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.fs.name(), self.path)
    }
}

impl PartialEq for VPath {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.fs, &other.fs) && self.path == other.path
    }
}

impl VPath {
    pub fn new(fs: Arc<dyn Filesystem>, path: impl Into<String>) -> Self {
        Self {
            fs,
            path: path.into(),
        }
    }

    pub fn fs(&self) -> &Arc<dyn Filesystem> {
        &self.fs
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Last path component (empty for root)
    pub fn name(&self) -> &str {
        let trimmed = self.path.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }

    /// Name without its final extension
    pub fn stem(&self) -> &str {
        let name = self.name();
        match name.rfind('.') {
            Some(idx) if idx > 0 => &name[..idx],
            _ => name,
        }
    }

    /// Lowercased final extension without the dot
    pub fn extension(&self) -> Option<String> {
        let name = self.name();
        match name.rfind('.') {
            Some(idx) if idx > 0 && idx + 1 < name.len() => {
                Some(name[idx + 1..].to_ascii_lowercase())
            }
            _ => None,
        }
    }

    pub fn parent(&self) -> Self {
        let trimmed = self.path.trim_end_matches('/');
        let parent = match trimmed.rfind('/') {
            Some(0) => "/",
            Some(idx) => &trimmed[..idx],
            None => "",
        };
        Self::new(Arc::clone(&self.fs), parent)
    }

    pub fn join(&self, child: &str) -> Self {
        Self::new(Arc::clone(&self.fs), join_path(&self.path, child))
    }

    /// Replace the final extension; `suffix` includes the dot or is empty.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        let name = self.name();
        let stem_len = self.stem().len();
        let base_len = self.path.trim_end_matches('/').len() - name.len();
        let path = format!("{}{}{}", &self.path[..base_len], &name[..stem_len], suffix);
        Self::new(Arc::clone(&self.fs), path)
    }

    /// Split on `separator`, if this is a composite path.
    pub fn composite(&self, separator: &str) -> Option<CompositePath<'_>> {
        split_composite(&self.path, separator)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // I/O
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn info(&self) -> VfsResult<InfoRecord> {
        self.fs.info(&self.path).await
    }

    pub async fn exists(&self) -> VfsResult<bool> {
        self.fs.exists(&self.path).await
    }

    pub async fn is_file(&self) -> VfsResult<bool> {
        self.fs.is_file(&self.path).await
    }

    pub async fn is_dir(&self) -> VfsResult<bool> {
        self.fs.is_dir(&self.path).await
    }

    pub async fn read_bytes(&self) -> VfsResult<Vec<u8>> {
        self.fs.read_all(&self.path).await
    }

    pub async fn read_prefix(&self, len: usize) -> VfsResult<Vec<u8>> {
        self.fs.read_prefix(&self.path, len).await
    }

    pub async fn read_text(&self) -> VfsResult<String> {
        let data = self.read_bytes().await?;
        String::from_utf8(data).map_err(|e| VfsError::backend(self.fs.name(), &self.path, e))
    }

    pub async fn write_bytes(&self, data: &[u8]) -> VfsResult<()> {
        self.fs.write_all(&self.path, data).await
    }

    pub async fn write_text(&self, text: &str) -> VfsResult<()> {
        self.write_bytes(text.as_bytes()).await
    }

    /// Create this directory. Without `parents` the parent must already exist.
    pub async fn mkdir(&self, parents: bool, exist_ok: bool) -> VfsResult<()> {
        if !parents {
            let parent = self.parent();
            if !parent.as_str().is_empty() && !parent.is_dir().await? {
                return Err(VfsError::not_found(parent.path));
            }
        }
        self.fs.make_dirs(&self.path, exist_ok).await
    }

    pub async fn remove(&self) -> VfsResult<()> {
        self.fs.remove(&self.path).await
    }

    /// Create an empty file. An existing file is left as it is unless
    /// `exist_ok` is false.
    pub async fn touch(&self, exist_ok: bool) -> VfsResult<()> {
        if self.exists().await? {
            if exist_ok {
                return Ok(());
            }
            return Err(VfsError::already_exists(self.path.clone()));
        }
        self.write_bytes(&[]).await
    }

    /// Remove this file; directories are refused.
    pub async fn unlink(&self, missing_ok: bool) -> VfsResult<()> {
        let info = match self.info().await {
            Ok(info) => info,
            Err(e) if missing_ok && e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        if info.is_dir() {
            return Err(VfsError::is_a_directory(self.path.clone()));
        }
        match self.remove().await {
            Err(e) if missing_ok && e.is_not_found() => Ok(()),
            result => result,
        }
    }

    /// Remove this directory, which must be empty.
    pub async fn rmdir(&self) -> VfsResult<()> {
        if !self.info().await?.is_dir() {
            return Err(VfsError::not_a_directory(self.path.clone()));
        }
        if !self.iterdir().await?.is_empty() {
            return Err(VfsError::invalid_path(format!(
                "{}: directory not empty",
                self.path
            )));
        }
        self.remove().await
    }

    /// Normalized metadata, like [`Self::info`]
    pub async fn stat(&self) -> VfsResult<InfoRecord> {
        self.info().await
    }

    /// Copy file contents to `target`, which may live on another filesystem.
    pub async fn copy_to(&self, target: &Self) -> VfsResult<Self> {
        let data = self.read_bytes().await?;
        target.write_bytes(&data).await?;
        debug!(from = %self, to = %target, bytes = data.len(), "copied");
        Ok(target.clone())
    }

    /// Copy to `target`, then unlink this file.
    pub async fn move_to(&self, target: &Self) -> VfsResult<Self> {
        let moved = self.copy_to(target).await?;
        self.unlink(false).await?;
        Ok(moved)
    }

    pub async fn list(&self, detail: bool) -> VfsResult<Listing> {
        self.fs.ls(&self.path, detail).await
    }

    /// Child handles of this directory
    pub async fn iterdir(&self) -> VfsResult<Vec<Self>> {
        Ok(self
            .fs
            .list_names(&self.path)
            .await?
            .into_iter()
            .filter(|name| name.trim_end_matches('/') != self.path.trim_end_matches('/'))
            .map(|name| Self::new(Arc::clone(&self.fs), name))
            .collect())
    }

    /// Handles for every path matching `pattern` below this one
    pub async fn glob(&self, pattern: &str) -> VfsResult<Vec<Self>> {
        let full = join_path(&self.path, pattern);
        let listing = self.fs.glob(&full, false).await?;
        Ok(listing
            .names()
            .into_iter()
            .map(|name| Self::new(Arc::clone(&self.fs), name))
            .collect())
    }

    /// [`Self::glob`] at any depth below this path
    pub async fn rglob(&self, pattern: &str) -> VfsResult<Vec<Self>> {
        self.glob(&format!("**/{}", pattern.trim_start_matches('/')))
            .await
    }
}
