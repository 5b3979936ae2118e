//! Filesystem manager - protocol registry and instance cache
//!
//! Features:
//! - Lazy protocol factories (instances built on first use)
//! - One cached instance per (protocol, options)
//! - URL parsing (`memory://notes/a.txt` -> memory fs + `/notes/a.txt`)

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::backend::Filesystem;
use crate::bridge::{BlockingPool, Offload, SyncBridge};
use crate::config::VfsConfig;
use crate::error::{VfsError, VfsResult};
use crate::local::LocalFs;
use crate::memory::MemoryFs;
use crate::path::normalize_path;

/// Construction options for a protocol, compared by value
pub type FsOptions = BTreeMap<String, String>;

/// Protocol factory for lazy initialization
pub type ProtocolFactory = Box<dyn Fn(&FsOptions) -> VfsResult<Arc<dyn Filesystem>> + Send + Sync>;

/// Protocol assumed for URLs without a scheme
pub const DEFAULT_PROTOCOL: &str = "file";

type InstanceKey = (String, FsOptions);

/// Filesystem manager - coordinates protocol factories and live instances
pub struct FsManager {
    /// Registered protocol factories
    factories: RwLock<HashMap<String, ProtocolFactory>>,
    /// Constructed instances
    instances: RwLock<HashMap<InstanceKey, Arc<dyn Filesystem>>>,
}

impl Default for FsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FsManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Manager with the built-in `memory` and `file` protocols.
    ///
    /// Every `file` instance shares one blocking pool sized by `config`.
    pub async fn with_defaults(config: &VfsConfig) -> Self {
        let manager = Self::new();
        let pool: Arc<dyn Offload> = Arc::new(BlockingPool::new(config.effective_workers()));

        manager
            .register_protocol(
                "memory",
                Box::new(|_: &FsOptions| Ok(Arc::new(MemoryFs::new()) as Arc<dyn Filesystem>)),
            )
            .await;
        manager
            .register_protocol(
                "file",
                Box::new(move |options: &FsOptions| {
                    let root = options.get("root").map_or("/", String::as_str);
                    let local = LocalFs::new(root);
                    Ok(Arc::new(SyncBridge::new(local, Arc::clone(&pool))) as Arc<dyn Filesystem>)
                }),
            )
            .await;
        manager
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Protocols
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a protocol factory, replacing any previous one.
    ///
    /// Instances already built by the old factory stay cached until disposed.
    pub async fn register_protocol(&self, protocol: impl Into<String>, factory: ProtocolFactory) {
        let protocol = protocol.into();
        debug!(protocol = %protocol, "registered protocol");
        self.factories.write().await.insert(protocol, factory);
    }

    /// List registered protocols
    pub async fn list_protocols(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Instances
    // ─────────────────────────────────────────────────────────────────────────

    /// Get or construct the instance for `protocol` with `options`
    pub async fn filesystem(
        &self,
        protocol: &str,
        options: &FsOptions,
    ) -> VfsResult<Arc<dyn Filesystem>> {
        let key = (protocol.to_string(), options.clone());
        if let Some(fs) = self.instances.read().await.get(&key) {
            return Ok(Arc::clone(fs));
        }

        let mut instances = self.instances.write().await;
        // another caller may have built it while we waited for the lock
        if let Some(fs) = instances.get(&key) {
            return Ok(Arc::clone(fs));
        }

        let factories = self.factories.read().await;
        let factory = factories
            .get(protocol)
            .ok_or_else(|| VfsError::invalid_path(format!("unknown protocol: {protocol}")))?;
        let fs = factory(options)?;
        debug!(protocol, ?options, "constructed filesystem");
        instances.insert(key, Arc::clone(&fs));
        Ok(fs)
    }

    /// Resolve `proto://path` to an instance and the path within it.
    ///
    /// URLs without a scheme use [`DEFAULT_PROTOCOL`].
    pub async fn from_url(
        &self,
        url: &str,
        options: &FsOptions,
    ) -> VfsResult<(Arc<dyn Filesystem>, String)> {
        let (protocol, path) = parse_url(url)?;
        let fs = self.filesystem(protocol, options).await?;
        Ok((fs, path))
    }

    /// Drop the cached instance for (protocol, options). Returns whether one existed.
    pub async fn dispose(&self, protocol: &str, options: &FsOptions) -> bool {
        let key = (protocol.to_string(), options.clone());
        let removed = self.instances.write().await.remove(&key).is_some();
        if removed {
            debug!(protocol, "disposed filesystem");
        }
        removed
    }

    /// Drop every cached instance
    pub async fn clear(&self) {
        self.instances.write().await.clear();
    }

    /// Number of cached instances
    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }
}

/// Split a URL into protocol and normalized path
pub fn parse_url(url: &str) -> VfsResult<(&str, String)> {
    let Some((protocol, rest)) = url.split_once("://") else {
        return Ok((DEFAULT_PROTOCOL, normalize_path(url)));
    };
    let valid = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '+';
    if protocol.is_empty() || !protocol.chars().all(valid) {
        return Err(VfsError::invalid_path(format!("invalid protocol in {url}")));
    }
    Ok((protocol, normalize_path(rest)))
}
