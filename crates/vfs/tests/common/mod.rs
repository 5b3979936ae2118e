//! Shared fakes for integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use strata_vfs::{
    Capabilities, ConstructFuture, Filesystem, InfoRecord, MemoryFs, ProbeRegistry, ProbeResult,
    RawInfo, Registration, SyncFilesystem, VPath, VfsError, VfsResult,
};
use tokio::sync::Mutex;

type Sections = BTreeMap<String, BTreeMap<String, String>>;

/// Writable sub-filesystem over an ini-style outer file.
///
/// `[section]` headers become directories, `key=value` lines become files.
/// Every mutation is rendered back into the outer file.
pub struct SectionsFs {
    outer: VPath,
    sections: Mutex<Sections>,
}

impl SectionsFs {
    pub async fn load(outer: VPath) -> VfsResult<Self> {
        let text = outer.read_text().await?;
        Ok(Self {
            outer,
            sections: Mutex::new(parse_sections(&text)),
        })
    }

    async fn persist(&self, sections: &Sections) -> VfsResult<()> {
        self.outer.write_text(&render_sections(sections)).await
    }
}

pub fn parse_sections(text: &str) -> Sections {
    let mut sections = Sections::new();
    let mut current = String::new();
    for line in text.lines().map(str::trim) {
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            current = name.to_string();
            sections.entry(current.clone()).or_default();
        } else if let Some((key, value)) = line.split_once('=') {
            sections
                .entry(current.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    sections
}

pub fn render_sections(sections: &Sections) -> String {
    let mut out = String::new();
    for (name, entries) in sections {
        out.push_str(&format!("[{name}]\n"));
        for (key, value) in entries {
            out.push_str(&format!("{key}={value}\n"));
        }
    }
    out
}

/// `/section` or `/section/key`
fn parts(path: &str) -> VfsResult<(Option<&str>, Option<&str>)> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [] => Ok((None, None)),
        [section] => Ok((Some(section), None)),
        [section, key] => Ok((Some(section), Some(key))),
        _ => Err(VfsError::invalid_path(path)),
    }
}

#[async_trait]
impl Filesystem for SectionsFs {
    fn name(&self) -> &str {
        "sections"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::READ_WRITE
    }

    async fn list(&self, path: &str) -> VfsResult<Vec<InfoRecord>> {
        let sections = self.sections.lock().await;
        match parts(path)? {
            (None, _) => Ok(sections
                .keys()
                .map(|name| InfoRecord::directory(format!("/{name}")))
                .collect()),
            (Some(section), None) => {
                let entries = sections
                    .get(section)
                    .ok_or_else(|| VfsError::not_found(path))?;
                Ok(entries
                    .iter()
                    .map(|(key, value)| {
                        InfoRecord::file(format!("/{section}/{key}"), value.len() as u64)
                    })
                    .collect())
            }
            (Some(_), Some(_)) => {
                drop(sections);
                Ok(vec![self.info(path).await?])
            }
        }
    }

    async fn info(&self, path: &str) -> VfsResult<InfoRecord> {
        let sections = self.sections.lock().await;
        match parts(path)? {
            (None, _) => Ok(InfoRecord::directory("/")),
            (Some(section), None) if sections.contains_key(section) => {
                Ok(InfoRecord::directory(format!("/{section}")))
            }
            (Some(section), Some(key)) => sections
                .get(section)
                .and_then(|entries| entries.get(key))
                .map(|value| InfoRecord::file(format!("/{section}/{key}"), value.len() as u64))
                .ok_or_else(|| VfsError::not_found(path)),
            _ => Err(VfsError::not_found(path)),
        }
    }

    async fn read_all(&self, path: &str) -> VfsResult<Vec<u8>> {
        let sections = self.sections.lock().await;
        match parts(path)? {
            (Some(section), Some(key)) => sections
                .get(section)
                .and_then(|entries| entries.get(key))
                .map(|value| value.clone().into_bytes())
                .ok_or_else(|| VfsError::not_found(path)),
            _ => Err(VfsError::is_a_directory(path)),
        }
    }

    async fn write_all(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        let (Some(section), Some(key)) = parts(path)? else {
            return Err(VfsError::is_a_directory(path));
        };
        let value = String::from_utf8(data.to_vec())
            .map_err(|e| VfsError::backend("sections", path, e))?;
        let mut sections = self.sections.lock().await;
        sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.persist(&sections).await
    }

    async fn make_dirs(&self, path: &str, exist_ok: bool) -> VfsResult<()> {
        let (Some(section), None) = parts(path)? else {
            return Err(VfsError::invalid_path(path));
        };
        let mut sections = self.sections.lock().await;
        if sections.contains_key(section) && !exist_ok {
            return Err(VfsError::already_exists(path));
        }
        sections.entry(section.to_string()).or_default();
        self.persist(&sections).await
    }

    async fn remove(&self, path: &str) -> VfsResult<()> {
        let mut sections = self.sections.lock().await;
        let removed = match parts(path)? {
            (Some(section), Some(key)) => sections
                .get_mut(section)
                .and_then(|entries| entries.remove(key))
                .is_some(),
            (Some(section), None) => sections.remove(section).is_some(),
            (None, _) => return Err(VfsError::invalid_path("cannot remove root")),
        };
        if !removed {
            return Err(VfsError::not_found(path));
        }
        self.persist(&sections).await
    }
}

/// `.ini` registration counting constructions, optionally slow to build.
pub fn sections_registration(constructed: Arc<AtomicUsize>, delay: Duration) -> Registration {
    Registration::new("sections", ["ini"], move |outer: VPath| -> ConstructFuture {
        let constructed = Arc::clone(&constructed);
        Box::pin(async move {
            constructed.fetch_add(1, Ordering::SeqCst);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let fs = SectionsFs::load(outer).await?;
            Ok::<_, VfsError>(Arc::new(fs) as Arc<dyn Filesystem>)
        })
    })
    .sniff(|prefix: &[u8]| {
        if prefix.starts_with(b"[") {
            ProbeResult::Match
        } else {
            ProbeResult::NoMatch
        }
    })
    .probe_size(1)
}

/// Read-only sub-filesystem tagged with its registration name.
pub fn tagged_registration(name: &'static str, extension: &str) -> Registration {
    Registration::new(name, [extension], move |_outer: VPath| -> ConstructFuture {
        Box::pin(async move {
            let fs = MemoryFs::with_files([("/tag", name)]);
            Ok::<_, VfsError>(Arc::new(fs) as Arc<dyn Filesystem>)
        })
    })
}

pub fn registry_with(registrations: impl IntoIterator<Item = Registration>) -> ProbeRegistry {
    let mut registry = ProbeRegistry::new();
    for registration in registrations {
        registry.register(registration);
    }
    registry
}

/// Blocking backend serving `/file-<n>` as `contents of <n>`, tracking
/// peak concurrency.
#[derive(Default)]
pub struct SlowNumbers {
    pub running: AtomicUsize,
    pub peak: AtomicUsize,
}

impl SyncFilesystem for SlowNumbers {
    fn name(&self) -> &str {
        "slow-numbers"
    }

    fn list(&self, _path: &str) -> VfsResult<Vec<RawInfo>> {
        Ok((0..3)
            .map(|n| {
                let mut raw = RawInfo::new();
                raw.insert("Key".into(), json!(format!("/file-{n}")));
                raw.insert("Size".into(), json!(12));
                raw.insert("LastModified".into(), json!(1_700_000_000.0));
                raw
            })
            .collect())
    }

    fn info(&self, path: &str) -> VfsResult<RawInfo> {
        let mut raw = RawInfo::new();
        raw.insert("path".into(), json!(path));
        raw.insert("length".into(), json!(12));
        Ok(raw)
    }

    fn read_all(&self, path: &str) -> VfsResult<Vec<u8>> {
        let n = path
            .strip_prefix("/file-")
            .ok_or_else(|| VfsError::not_found(path))?;
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(3));
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(format!("contents of {n}").into_bytes())
    }
}

/// Install a test subscriber once; honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
