use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde_json::{json, Value};

use crate::backend::Capabilities;
use crate::bridge::SyncFilesystem;
use crate::error::{VfsError, VfsResult};
use crate::info::RawInfo;
use crate::path::{join_path, normalize_path};

/// Local filesystem backend rooted at a sandbox directory
///
/// Blocking `std::fs` calls; wrap in [`SyncBridge`](crate::SyncBridge) to use
/// it through the async contract.
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    /// Create new local FS backend with specified root directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root_path = root.into();
        // Ensure root exists and canonicalize it
        let _ = fs::create_dir_all(&root_path);
        Self {
            root: root_path.canonicalize().unwrap_or(root_path),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject path syntax that is ambiguous across platforms
    fn validate(path: &str) -> VfsResult<()> {
        if path.contains('\\') {
            return Err(VfsError::invalid_path(format!(
                "{path}: backslashes not allowed"
            )));
        }
        if path.contains(':') {
            return Err(VfsError::invalid_path(format!("{path}: colon not allowed")));
        }
        Ok(())
    }

    /// Resolve VFS path to absolute filesystem path with security checks
    ///
    /// SECURITY: Prevents path traversal attacks by:
    /// 1. Rejecting `..` components lexically
    /// 2. Canonicalizing the deepest existing ancestor and verifying it stays
    ///    within root, then appending the components that do not exist yet
    fn resolve(&self, path: &str) -> VfsResult<PathBuf> {
        Self::validate(path)?;
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(VfsError::invalid_path(format!("{path}: escapes sandbox")));
        }

        let target = self.root.join(relative);

        // symlink_metadata so a dangling link counts as existing and fails
        // canonicalization below instead of being written through
        let mut existing = target.as_path();
        let mut missing = Vec::new();
        while existing.symlink_metadata().is_err() {
            let (Some(name), Some(parent)) = (existing.file_name(), existing.parent()) else {
                break;
            };
            missing.push(name);
            existing = parent;
        }

        let canonical = existing
            .canonicalize()
            .map_err(|e| self.io_err(path, e))?;
        // SECURITY CHECK: symlinks must not lead outside the sandbox
        if !canonical.starts_with(&self.root) {
            return Err(VfsError::invalid_path(format!(
                "{path}: escapes sandbox {}",
                self.root.display()
            )));
        }
        Ok(missing
            .into_iter()
            .rev()
            .fold(canonical, |resolved, name| resolved.join(name)))
    }

    fn io_err(&self, path: &str, err: io::Error) -> VfsError {
        VfsError::from_io(self.name(), path, err)
    }

    fn raw_info(name: &str, meta: &fs::Metadata) -> RawInfo {
        let secs = |t: io::Result<std::time::SystemTime>| -> Value {
            t.ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(Value::Null, |d| json!(d.as_secs_f64()))
        };

        let mut raw = RawInfo::new();
        raw.insert("name".into(), json!(name));
        raw.insert(
            "type".into(),
            json!(if meta.is_dir() { "directory" } else { "file" }),
        );
        raw.insert("size".into(), json!(meta.len()));
        raw.insert("modified".into(), secs(meta.modified()));
        raw.insert("created".into(), secs(meta.created()));
        raw.insert("readonly".into(), json!(meta.permissions().readonly()));
        raw
    }
}

impl SyncFilesystem for LocalFs {
    fn name(&self) -> &str {
        "local"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::READ_WRITE
    }

    fn list(&self, path: &str) -> VfsResult<Vec<RawInfo>> {
        let resolved = self.resolve(path)?;
        let name = normalize_path(path);
        let meta = fs::metadata(&resolved).map_err(|e| self.io_err(path, e))?;
        if !meta.is_dir() {
            return Ok(vec![Self::raw_info(&name, &meta)]);
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&resolved).map_err(|e| self.io_err(path, e))? {
            let entry = entry.map_err(|e| self.io_err(path, e))?;
            let meta = entry.metadata().map_err(|e| self.io_err(path, e))?;
            let child = join_path(&name, &entry.file_name().to_string_lossy());
            entries.push(Self::raw_info(&child, &meta));
        }
        entries.sort_by(|a, b| {
            let name = |raw: &RawInfo| raw.get("name").and_then(Value::as_str).map(str::to_owned);
            name(a).cmp(&name(b))
        });
        Ok(entries)
    }

    fn info(&self, path: &str) -> VfsResult<RawInfo> {
        let resolved = self.resolve(path)?;
        let meta = fs::metadata(resolved).map_err(|e| self.io_err(path, e))?;
        Ok(Self::raw_info(&normalize_path(path), &meta))
    }

    fn read_all(&self, path: &str) -> VfsResult<Vec<u8>> {
        let resolved = self.resolve(path)?;
        fs::read(resolved).map_err(|e| self.io_err(path, e))
    }

    fn read_prefix(&self, path: &str, len: usize) -> VfsResult<Vec<u8>> {
        let resolved = self.resolve(path)?;
        let file = fs::File::open(resolved).map_err(|e| self.io_err(path, e))?;
        let mut buffer = Vec::with_capacity(len.min(64 * 1024));
        file.take(len as u64)
            .read_to_end(&mut buffer)
            .map_err(|e| self.io_err(path, e))?;
        Ok(buffer)
    }

    fn write_all(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_err(path, e))?;
        }
        fs::write(resolved, data).map_err(|e| self.io_err(path, e))
    }

    fn make_dirs(&self, path: &str, exist_ok: bool) -> VfsResult<()> {
        let resolved = self.resolve(path)?;
        if resolved.exists() && !exist_ok {
            return Err(VfsError::already_exists(path));
        }
        fs::create_dir_all(resolved).map_err(|e| self.io_err(path, e))
    }

    fn remove(&self, path: &str) -> VfsResult<()> {
        let resolved = self.resolve(path)?;
        if resolved == self.root {
            return Err(VfsError::invalid_path("cannot remove sandbox root"));
        }
        let meta = fs::metadata(&resolved).map_err(|e| self.io_err(path, e))?;
        if meta.is_dir() {
            fs::remove_dir(resolved).map_err(|e| self.io_err(path, e))
        } else {
            fs::remove_file(resolved).map_err(|e| self.io_err(path, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_write_roundtrip() {
        let dir = tempdir().unwrap();
        let fs = LocalFs::new(dir.path());

        fs.write_all("nested/test.txt", b"Hello, local").unwrap();
        assert_eq!(fs.read_all("/nested/test.txt").unwrap(), b"Hello, local");
        assert_eq!(fs.read_prefix("nested/test.txt", 5).unwrap(), b"Hello");

        let info = fs.info("nested/test.txt").unwrap();
        assert_eq!(info["name"], "/nested/test.txt");
        assert_eq!(info["size"], 12);
    }

    #[test]
    fn test_list_sorted_with_vfs_names() {
        let dir = tempdir().unwrap();
        let fs = LocalFs::new(dir.path());
        fs.write_all("b.txt", b"b").unwrap();
        fs.write_all("a.txt", b"a").unwrap();
        fs.make_dirs("sub", false).unwrap();

        let names: Vec<String> = fs
            .list("/")
            .unwrap()
            .into_iter()
            .map(|r| r["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["/a.txt", "/b.txt", "/sub"]);
        assert!(matches!(
            fs.make_dirs("sub", false),
            Err(VfsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_traversal_blocked() {
        let dir = tempdir().unwrap();
        let fs = LocalFs::new(dir.path().join("root"));
        assert!(matches!(
            fs.read_all("../../etc/passwd"),
            Err(VfsError::InvalidPath(_))
        ));
        assert!(fs.info("missing.txt").unwrap_err().is_not_found());
    }
}
