//! Canonical info records.
//!
//! Backends describe entries in whatever shape their wire format uses.
//! Everything crossing the [`Filesystem`](crate::Filesystem) boundary is
//! normalized into [`InfoRecord`] using the alias tables below.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Backend-native info mapping, prior to normalization.
pub type RawInfo = Map<String, Value>;

/// Modification-time spellings, highest priority first.
pub const MTIME_ALIASES: &[&str] = &[
    "mtime",
    "modified",
    "last_modified",
    "LastModified",
    "mod_time",
    "modTime",
    "updated_at",
];

/// Size spellings, highest priority first.
pub const SIZE_ALIASES: &[&str] = &["size", "Size", "ContentLength", "content_length", "length"];

/// Entry-type spellings, highest priority first.
pub const TYPE_ALIASES: &[&str] = &["type", "kind", "entry_type"];

/// Type of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Directory,
}

impl FileType {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "file" | "f" | "blob" | "regular" => Some(Self::File),
            "directory" | "dir" | "d" | "folder" | "tree" => Some(Self::Directory),
            _ => None,
        }
    }
}

/// Normalized description of a file or directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoRecord {
    /// Full path of the entry within its filesystem.
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FileType,
    /// Size in bytes (0 for directories and when unknown).
    pub size: u64,
    /// Modification time in seconds since the epoch (0 when unknown).
    pub mtime: f64,
    /// Backend-specific keys, passed through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl InfoRecord {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            kind: FileType::File,
            size,
            mtime: 0.0,
            extra: BTreeMap::new(),
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FileType::Directory,
            size: 0,
            mtime: 0.0,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_mtime(mut self, mtime: f64) -> Self {
        self.mtime = mtime;
        self
    }

    pub fn with_modified(self, modified: Option<SystemTime>) -> Self {
        let mtime = modified
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0.0, |d| d.as_secs_f64());
        self.with_mtime(mtime)
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileType::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileType::Directory
    }

    /// Last path component of `name`.
    pub fn basename(&self) -> &str {
        let trimmed = self.name.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }

    /// Normalize a backend-native mapping.
    ///
    /// `fallback_name` is used when the mapping carries no `name`/`path` key.
    /// Alias keys that lose to a higher-priority spelling are dropped; all
    /// other unknown keys land in `extra`.
    pub fn from_raw(mut raw: RawInfo, fallback_name: &str) -> Self {
        let name = take_first(&mut raw, &["name", "path", "Key"])
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| fallback_name.to_owned());

        let kind = take_first(&mut raw, TYPE_ALIASES)
            .and_then(|v| v.as_str().and_then(FileType::parse))
            .or_else(|| match raw.remove("is_dir") {
                Some(Value::Bool(true)) => Some(FileType::Directory),
                Some(Value::Bool(false)) => Some(FileType::File),
                _ => None,
            })
            .unwrap_or(if name.ends_with('/') {
                FileType::Directory
            } else {
                FileType::File
            });

        let size = take_first(&mut raw, SIZE_ALIASES)
            .and_then(|v| as_u64(&v))
            .unwrap_or(0);
        let mtime = take_first(&mut raw, MTIME_ALIASES)
            .and_then(|v| as_f64(&v))
            .unwrap_or(0.0);

        Self {
            name,
            kind,
            size: if kind == FileType::Directory { 0 } else { size },
            mtime,
            extra: raw.into_iter().collect(),
        }
    }
}

/// Remove every alias from `raw`, returning the value of the highest-priority
/// one present.
fn take_first(raw: &mut RawInfo, aliases: &[&str]) -> Option<Value> {
    let mut winner = None;
    for alias in aliases {
        if let Some(value) = raw.remove(*alias) {
            if winner.is_none() && !value.is_null() {
                winner = Some(value);
            }
        }
    }
    winner
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
