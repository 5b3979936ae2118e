//! In-memory filesystem backend
//!
//! Provides a fast, ephemeral filesystem that exists only in memory.
//! Serves as the write-capable reference backend and as the parent
//! filesystem in router tests.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use async_trait::async_trait;

use crate::backend::{Capabilities, Filesystem};
use crate::error::{VfsError, VfsResult};
use crate::info::InfoRecord;
use crate::path::normalize_path;

/// In-memory file entry
#[derive(Clone, Debug)]
enum MemoryEntry {
    File { data: Vec<u8>, modified: SystemTime },
    Directory,
}

/// In-memory filesystem backend
///
/// All data is stored in memory and lost when the last clone is dropped.
/// Clones share the same tree.
#[derive(Clone)]
pub struct MemoryFs {
    entries: Arc<RwLock<BTreeMap<String, MemoryEntry>>>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    /// Create a new empty in-memory filesystem
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        // Root always exists
        entries.insert("/".to_string(), MemoryEntry::Directory);
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Create with initial file contents
    pub fn with_files<P, C>(files: impl IntoIterator<Item = (P, C)>) -> Self
    where
        P: AsRef<str>,
        C: AsRef<[u8]>,
    {
        let fs = Self::new();
        if let Ok(mut entries) = fs.entries.write() {
            for (path, content) in files {
                let path = normalize_path(path.as_ref());
                Self::insert_parents(&mut entries, &path);
                entries.insert(
                    path,
                    MemoryEntry::File {
                        data: content.as_ref().to_vec(),
                        modified: SystemTime::now(),
                    },
                );
            }
        }
        fs
    }

    fn read_lock(&self) -> VfsResult<RwLockReadGuard<'_, BTreeMap<String, MemoryEntry>>> {
        self.entries
            .read()
            .map_err(|_| VfsError::other("memory fs lock poisoned"))
    }

    fn write_lock(&self) -> VfsResult<RwLockWriteGuard<'_, BTreeMap<String, MemoryEntry>>> {
        self.entries
            .write()
            .map_err(|_| VfsError::other("memory fs lock poisoned"))
    }

    /// Create every missing ancestor of `path` as a directory
    fn insert_parents(entries: &mut BTreeMap<String, MemoryEntry>, path: &str) {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut current = String::new();
        for part in &parts[..parts.len().saturating_sub(1)] {
            current = format!("{current}/{part}");
            entries
                .entry(current.clone())
                .or_insert(MemoryEntry::Directory);
        }
    }

    fn record(path: &str, entry: &MemoryEntry) -> InfoRecord {
        match entry {
            MemoryEntry::File { data, modified } => {
                InfoRecord::file(path, data.len() as u64).with_modified(Some(*modified))
            }
            MemoryEntry::Directory => InfoRecord::directory(path),
        }
    }
}

#[async_trait]
impl Filesystem for MemoryFs {
    fn name(&self) -> &str {
        "memory"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::READ_WRITE
    }

    async fn list(&self, path: &str) -> VfsResult<Vec<InfoRecord>> {
        let path = normalize_path(path);
        let entries = self.read_lock()?;

        match entries.get(&path) {
            Some(MemoryEntry::Directory) => {}
            Some(entry) => return Ok(vec![Self::record(&path, entry)]),
            None => return Err(VfsError::not_found(path)),
        }

        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };

        // BTreeMap keeps children sorted by name
        Ok(entries
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| {
                let remainder = &key[prefix.len()..];
                !remainder.is_empty() && !remainder.contains('/')
            })
            .map(|(key, entry)| Self::record(key, entry))
            .collect())
    }

    async fn info(&self, path: &str) -> VfsResult<InfoRecord> {
        let path = normalize_path(path);
        let entries = self.read_lock()?;
        entries
            .get(&path)
            .map(|entry| Self::record(&path, entry))
            .ok_or_else(|| VfsError::not_found(path))
    }

    async fn read_all(&self, path: &str) -> VfsResult<Vec<u8>> {
        let path = normalize_path(path);
        let entries = self.read_lock()?;

        match entries.get(&path) {
            Some(MemoryEntry::File { data, .. }) => Ok(data.clone()),
            Some(MemoryEntry::Directory) => Err(VfsError::is_a_directory(path)),
            None => Err(VfsError::not_found(path)),
        }
    }

    async fn read_prefix(&self, path: &str, len: usize) -> VfsResult<Vec<u8>> {
        let path = normalize_path(path);
        let entries = self.read_lock()?;

        match entries.get(&path) {
            Some(MemoryEntry::File { data, .. }) => Ok(data[..len.min(data.len())].to_vec()),
            Some(MemoryEntry::Directory) => Err(VfsError::is_a_directory(path)),
            None => Err(VfsError::not_found(path)),
        }
    }

    async fn write_all(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        let path = normalize_path(path);
        let mut entries = self.write_lock()?;

        if let Some(MemoryEntry::Directory) = entries.get(&path) {
            return Err(VfsError::is_a_directory(path));
        }
        Self::insert_parents(&mut entries, &path);
        entries.insert(
            path,
            MemoryEntry::File {
                data: data.to_vec(),
                modified: SystemTime::now(),
            },
        );
        Ok(())
    }

    async fn make_dirs(&self, path: &str, exist_ok: bool) -> VfsResult<()> {
        let path = normalize_path(path);
        let mut entries = self.write_lock()?;

        match entries.get(&path) {
            Some(MemoryEntry::Directory) if exist_ok => return Ok(()),
            Some(MemoryEntry::Directory) => return Err(VfsError::already_exists(path)),
            Some(_) => return Err(VfsError::already_exists(path)),
            None => {}
        }
        Self::insert_parents(&mut entries, &path);
        entries.insert(path, MemoryEntry::Directory);
        Ok(())
    }

    async fn remove(&self, path: &str) -> VfsResult<()> {
        let path = normalize_path(path);
        if path == "/" {
            return Err(VfsError::invalid_path("cannot remove root"));
        }
        let mut entries = self.write_lock()?;

        let prefix = format!("{path}/");
        if entries.keys().any(|key| key.starts_with(&prefix)) {
            return Err(VfsError::other(format!("directory not empty: {path}")));
        }
        entries
            .remove(&path)
            .map(|_| ())
            .ok_or_else(|| VfsError::not_found(path))
    }

    async fn exists(&self, path: &str) -> VfsResult<bool> {
        let path = normalize_path(path);
        Ok(self.read_lock()?.contains_key(&path))
    }
}
