//! Delegating router.
//!
//! Paths without the separator go straight to the parent filesystem. For
//! `outer::inner` the outer file is resolved against the parent, a
//! specialized filesystem is built over it (once per validity period), and
//! the call is forwarded with `inner`.
//!
//! Writable sub-filesystems persist their changes into the outer file; the
//! router drops the cached instance after every mutation so the next access
//! re-derives structure from the updated file.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::backend::{Capabilities, Filesystem, Listing};
use crate::config::{ListingMode, VfsConfig};
use crate::error::{VfsError, VfsResult};
use crate::info::InfoRecord;
use crate::path::{normalize_path, split_composite, CompositePath, VPath, DEFAULT_SEPARATOR};
use crate::registry::{ProbeRegistry, Registration};

/// A constructed sub-filesystem and the cache generation it belongs to.
#[derive(Clone)]
pub struct Delegate {
    registration: String,
    fs: Arc<dyn Filesystem>,
    token: u64,
}

impl std::fmt::Debug for Delegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delegate")
            .field("registration", &self.registration)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

impl Delegate {
    /// Name of the registration that built this delegate
    pub fn registration(&self) -> &str {
        &self.registration
    }

    pub fn fs(&self) -> &Arc<dyn Filesystem> {
        &self.fs
    }

    /// Validity token; a new construction always gets a larger one.
    pub fn token(&self) -> u64 {
        self.token
    }
}

/// Cache entry for one outer path. Concurrent first accesses share the cell.
struct CacheSlot {
    token: u64,
    cell: OnceCell<Delegate>,
}

struct DiscardOnDrop<'a> {
    router: &'a DelegatingFs,
    key: &'a str,
    slot: &'a Arc<CacheSlot>,
    armed: bool,
}

impl Drop for DiscardOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            // poisoned lock: nothing left to clean
            let _ = self.router.discard_empty(self.key, self.slot);
        }
    }
}

/// Filesystem that transparently routes composite paths to sub-filesystems
pub struct DelegatingFs {
    parent: Arc<dyn Filesystem>,
    registry: RwLock<Arc<ProbeRegistry>>,
    cache: Mutex<HashMap<String, Arc<CacheSlot>>>,
    next_token: AtomicU64,
    separator: String,
    listing: ListingMode,
}

impl DelegatingFs {
    pub fn new(parent: Arc<dyn Filesystem>, registry: ProbeRegistry) -> Self {
        Self {
            parent,
            registry: RwLock::new(Arc::new(registry)),
            cache: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            separator: DEFAULT_SEPARATOR.to_string(),
            listing: ListingMode::default(),
        }
    }

    /// Router with separator, listing mode and probe size taken from `config`
    pub fn from_config(
        parent: Arc<dyn Filesystem>,
        registry: ProbeRegistry,
        config: &VfsConfig,
    ) -> VfsResult<Self> {
        config.validate()?;
        Ok(Self::new(parent, registry.with_probe_bytes(config.probe_bytes))
            .with_separator(config.separator.clone())
            .with_listing(config.listing))
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn with_listing(mut self, listing: ListingMode) -> Self {
        self.listing = listing;
        self
    }

    pub fn parent(&self) -> &Arc<dyn Filesystem> {
        &self.parent
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Add a registration after construction. Cached delegates are dropped
    /// since resolution may now pick differently.
    pub fn register(&self, registration: Registration) -> VfsResult<()> {
        {
            let mut registry = self
                .registry
                .write()
                .map_err(|_| VfsError::other("registry lock poisoned"))?;
            Arc::make_mut(&mut *registry).register(registration);
        }
        self.clear_cache()
    }

    fn registry(&self) -> VfsResult<Arc<ProbeRegistry>> {
        self.registry
            .read()
            .map(|r| Arc::clone(&*r))
            .map_err(|_| VfsError::other("registry lock poisoned"))
    }

    fn split<'a>(&self, path: &'a str) -> Option<CompositePath<'a>> {
        split_composite(path, &self.separator)
    }

    fn lock_cache(&self) -> VfsResult<MutexGuard<'_, HashMap<String, Arc<CacheSlot>>>> {
        self.cache
            .lock()
            .map_err(|_| VfsError::other("delegate cache lock poisoned"))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cache
    // ─────────────────────────────────────────────────────────────────────────

    /// The sub-filesystem for `outer`, building it on first use.
    pub async fn delegate(&self, outer: &str) -> VfsResult<Delegate> {
        let key = normalize_path(outer);
        let slot = {
            let mut cache = self.lock_cache()?;
            let slot = cache.entry(key.clone()).or_insert_with(|| {
                Arc::new(CacheSlot {
                    token: self.next_token.fetch_add(1, Ordering::SeqCst),
                    cell: OnceCell::new(),
                })
            });
            Arc::clone(slot)
        };

        if let Some(delegate) = slot.cell.get() {
            debug!(outer = %key, token = slot.token, "delegate cache hit");
            return Ok(delegate.clone());
        }

        // failed or abandoned constructions must not leave the slot behind
        let mut guard = DiscardOnDrop {
            router: self,
            key: &key,
            slot: &slot,
            armed: true,
        };
        let result = slot
            .cell
            .get_or_try_init(|| self.construct(&key, slot.token))
            .await
            .cloned();
        match &result {
            Ok(_) => guard.armed = false,
            Err(e) => warn!(outer = %key, error = %e, "delegate construction failed"),
        }
        result
    }

    async fn construct(&self, key: &str, token: u64) -> VfsResult<Delegate> {
        let outer = VPath::new(Arc::clone(&self.parent), key);

        // outer resolution precedes any inner interpretation
        if outer.info().await?.is_dir() {
            return Err(VfsError::is_a_directory(key));
        }

        let registration = self.registry()?.resolve(&outer).await?;
        let fs = registration.factory().construct(outer).await?;
        debug!(outer = %key, delegate = registration.name(), token, "constructed delegate");
        Ok(Delegate {
            registration: registration.name().to_string(),
            fs,
            token,
        })
    }

    /// Remove an unfilled slot nobody else is waiting on. The map and the
    /// caller account for two references.
    fn discard_empty(&self, key: &str, slot: &Arc<CacheSlot>) -> VfsResult<()> {
        let mut cache = self.lock_cache()?;
        if let Some(current) = cache.get(key) {
            if Arc::ptr_eq(current, slot)
                && !current.cell.initialized()
                && Arc::strong_count(current) <= 2
            {
                cache.remove(key);
                debug!(outer = %key, "discarded unfilled delegate slot");
            }
        }
        Ok(())
    }

    /// Drop the cached delegate for `outer`. Returns whether one was cached.
    pub fn invalidate(&self, outer: &str) -> VfsResult<bool> {
        let key = normalize_path(outer);
        let removed = self.lock_cache()?.remove(&key).is_some();
        if removed {
            debug!(outer = %key, "invalidated delegate");
        }
        Ok(removed)
    }

    pub fn clear_cache(&self) -> VfsResult<()> {
        self.lock_cache()?.clear();
        Ok(())
    }

    /// Outer paths with a constructed delegate
    pub fn cached_outers(&self) -> VfsResult<Vec<String>> {
        let mut outers: Vec<String> = self
            .lock_cache()?
            .iter()
            .filter(|(_, slot)| slot.cell.initialized())
            .map(|(key, _)| key.clone())
            .collect();
        outers.sort();
        Ok(outers)
    }

    /// Token of the constructed delegate for `outer`, if any
    pub fn validity_token(&self, outer: &str) -> VfsResult<Option<u64>> {
        let key = normalize_path(outer);
        Ok(self
            .lock_cache()?
            .get(&key)
            .and_then(|slot| slot.cell.get())
            .map(Delegate::token))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Forwarding helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Re-express a delegate's entry name as a composite path.
    fn composite_name(&self, outer: &str, inner: &str) -> String {
        format!(
            "{}{}{}",
            outer,
            self.separator,
            inner.trim_start_matches('/')
        )
    }

    fn rewrite(&self, outer: &str, mut record: InfoRecord) -> InfoRecord {
        record.name = self.composite_name(outer, &record.name);
        record
    }

    fn rewrite_listing(&self, outer: &str, listing: Listing) -> Listing {
        match listing {
            Listing::Detailed(records) => Listing::Detailed(
                records
                    .into_iter()
                    .map(|r| self.rewrite(outer, r))
                    .collect(),
            ),
            Listing::Names(names) => Listing::Names(
                names
                    .into_iter()
                    .map(|n| self.composite_name(outer, &n))
                    .collect(),
            ),
        }
    }

    /// Delegate that declares `wanted`, or `Unsupported`.
    async fn mutable_delegate(
        &self,
        outer: &str,
        operation: &'static str,
        wanted: impl Fn(Capabilities) -> bool,
    ) -> VfsResult<Delegate> {
        let delegate = self.delegate(outer).await?;
        if !wanted(delegate.fs.capabilities()) {
            return Err(VfsError::unsupported(operation, delegate.registration.clone()));
        }
        Ok(delegate)
    }

    /// Whether a plain `list` of `path` should open the virtual root instead.
    async fn lists_as_virtual_root(&self, path: &str) -> VfsResult<bool> {
        if self.listing != ListingMode::Virtual {
            return Ok(false);
        }
        let handle = VPath::new(Arc::clone(&self.parent), path);
        let Some(ext) = handle.extension() else {
            return Ok(false);
        };
        if !self.registry()?.is_registered(&ext) {
            return Ok(false);
        }
        self.parent.is_file(path).await
    }
}

#[async_trait]
impl Filesystem for DelegatingFs {
    fn name(&self) -> &str {
        "delegating"
    }

    fn capabilities(&self) -> Capabilities {
        self.parent.capabilities()
    }

    async fn list(&self, path: &str) -> VfsResult<Vec<InfoRecord>> {
        let Some(split) = self.split(path) else {
            if self.lists_as_virtual_root(path).await? {
                match self.delegate(path).await {
                    Ok(delegate) => {
                        let records = delegate.fs.list("/").await?;
                        return Ok(records.into_iter().map(|r| self.rewrite(path, r)).collect());
                    }
                    Err(VfsError::NoDelegateMatch { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
            return self.parent.list(path).await;
        };

        let delegate = self.delegate(split.outer).await?;
        let records = delegate.fs.list(&normalize_path(split.inner)).await?;
        Ok(records
            .into_iter()
            .map(|r| self.rewrite(split.outer, r))
            .collect())
    }

    async fn info(&self, path: &str) -> VfsResult<InfoRecord> {
        let Some(split) = self.split(path) else {
            return self.parent.info(path).await;
        };
        let delegate = self.delegate(split.outer).await?;
        let record = delegate.fs.info(&normalize_path(split.inner)).await?;
        Ok(self.rewrite(split.outer, record))
    }

    async fn read_all(&self, path: &str) -> VfsResult<Vec<u8>> {
        let Some(split) = self.split(path) else {
            return self.parent.read_all(path).await;
        };
        let delegate = self.delegate(split.outer).await?;
        delegate.fs.read_all(&normalize_path(split.inner)).await
    }

    async fn read_prefix(&self, path: &str, len: usize) -> VfsResult<Vec<u8>> {
        let Some(split) = self.split(path) else {
            return self.parent.read_prefix(path, len).await;
        };
        let delegate = self.delegate(split.outer).await?;
        delegate
            .fs
            .read_prefix(&normalize_path(split.inner), len)
            .await
    }

    async fn write_all(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        let Some(split) = self.split(path) else {
            let result = self.parent.write_all(path, data).await;
            self.invalidate(path)?;
            return result;
        };
        let delegate = self
            .mutable_delegate(split.outer, "write", |c| c.write)
            .await?;
        let result = delegate
            .fs
            .write_all(&normalize_path(split.inner), data)
            .await;
        self.invalidate(split.outer)?;
        result
    }

    async fn make_dirs(&self, path: &str, exist_ok: bool) -> VfsResult<()> {
        let Some(split) = self.split(path) else {
            return self.parent.make_dirs(path, exist_ok).await;
        };
        let delegate = self
            .mutable_delegate(split.outer, "make_dirs", |c| c.make_dirs)
            .await?;
        let result = delegate
            .fs
            .make_dirs(&normalize_path(split.inner), exist_ok)
            .await;
        self.invalidate(split.outer)?;
        result
    }

    async fn remove(&self, path: &str) -> VfsResult<()> {
        let Some(split) = self.split(path) else {
            let result = self.parent.remove(path).await;
            self.invalidate(path)?;
            return result;
        };
        let delegate = self
            .mutable_delegate(split.outer, "remove", |c| c.remove)
            .await?;
        let result = delegate.fs.remove(&normalize_path(split.inner)).await;
        self.invalidate(split.outer)?;
        result
    }

    async fn exists(&self, path: &str) -> VfsResult<bool> {
        let Some(split) = self.split(path) else {
            return self.parent.exists(path).await;
        };
        let delegate = match self.delegate(split.outer).await {
            Ok(delegate) => delegate,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        delegate.fs.exists(&normalize_path(split.inner)).await
    }

    async fn glob(&self, pattern: &str, detail: bool) -> VfsResult<Listing> {
        let Some(split) = self.split(pattern) else {
            return self.parent.glob(pattern, detail).await;
        };
        if split.outer.contains(['*', '?', '[', '{']) {
            return Err(VfsError::invalid_path(format!(
                "{pattern}: wildcards are only supported after {}",
                self.separator
            )));
        }
        let delegate = self.delegate(split.outer).await?;
        let listing = delegate
            .fs
            .glob(&normalize_path(split.inner), detail)
            .await?;
        Ok(self.rewrite_listing(split.outer, listing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConstructFuture;
    use crate::MemoryFs;
    use std::time::Duration;

    /// Sub-filesystem exposing each line of the outer file as `/line<N>`.
    fn lines_registration() -> Registration {
        Registration::new("lines", ["lines"], |outer: VPath| -> ConstructFuture {
            Box::pin(async move {
                let text = outer.read_text().await?;
                let fs = MemoryFs::with_files(
                    text.lines()
                        .enumerate()
                        .map(|(i, line)| (format!("/line{i}"), line.to_string())),
                );
                Ok::<_, VfsError>(Arc::new(fs) as Arc<dyn Filesystem>)
            })
        })
    }

    fn router() -> DelegatingFs {
        let parent = MemoryFs::with_files(vec![
            ("/poem.lines", "roses\nviolets"),
            ("/notes.txt", "plain"),
        ]);
        let mut registry = ProbeRegistry::new();
        registry.register(lines_registration());
        DelegatingFs::new(Arc::new(parent), registry)
    }

    #[tokio::test]
    async fn plain_paths_pass_through() {
        let fs = router();
        assert_eq!(fs.read_all("/notes.txt").await.unwrap(), b"plain");
        let listing = fs.list("/poem.lines").await.unwrap();
        assert_eq!(listing.len(), 1);
        assert!(listing[0].is_file());
        assert!(fs.cached_outers().unwrap().is_empty());
    }

    #[tokio::test]
    async fn composite_paths_route_to_delegate() {
        let fs = router();
        let names = fs.list_names("/poem.lines::").await.unwrap();
        assert_eq!(names, vec!["/poem.lines::line0", "/poem.lines::line1"]);
        assert_eq!(fs.read_all("/poem.lines::line1").await.unwrap(), b"violets");
        assert!(fs.exists("/poem.lines::line0").await.unwrap());
        assert!(!fs.exists("/poem.lines::line9").await.unwrap());
        assert_eq!(fs.cached_outers().unwrap(), vec!["/poem.lines"]);
    }

    #[tokio::test]
    async fn missing_outer_is_not_found_not_no_match() {
        let fs = router();
        assert!(fs.list("/absent.lines::").await.unwrap_err().is_not_found());
        assert!(matches!(
            fs.list("/notes.txt::").await,
            Err(VfsError::NoDelegateMatch { .. })
        ));
        // failed constructions leave nothing behind
        assert!(fs.cached_outers().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_outer_does_not_exist() {
        let fs = router();
        assert!(!fs.exists("/absent.lines::line0").await.unwrap());
        assert!(!fs.is_file("/absent.lines::line0").await.unwrap());
        // no registration is still an error, not a missing file
        assert!(matches!(
            fs.exists("/notes.txt::line0").await,
            Err(VfsError::NoDelegateMatch { .. })
        ));
    }

    #[tokio::test]
    async fn outer_write_invalidates() {
        let fs = router();
        let before = fs.delegate("/poem.lines").await.unwrap().token();

        fs.write_all("/poem.lines", b"tulips").await.unwrap();
        assert_eq!(fs.validity_token("/poem.lines").unwrap(), None);

        assert_eq!(fs.read_all("/poem.lines::line0").await.unwrap(), b"tulips");
        let after = fs.validity_token("/poem.lines").unwrap().unwrap();
        assert!(after > before);
    }

    #[tokio::test]
    async fn read_only_delegate_rejects_writes() {
        let fs = router();
        // MemoryFs delegates are writable; wrap the factory to hide that
        fs.register(
            Registration::new("ro", ["ro"], |_outer: VPath| -> ConstructFuture {
                Box::pin(async {
                    Ok::<_, VfsError>(Arc::new(ReadOnly(MemoryFs::new())) as Arc<dyn Filesystem>)
                })
            }),
        )
        .unwrap();
        fs.parent().write_all("/x.ro", b"").await.unwrap();

        let err = fs.write_all("/x.ro::a", b"1").await.unwrap_err();
        assert!(err.is_unsupported());
        assert!(fs.remove("/x.ro::a").await.unwrap_err().is_unsupported());
    }

    #[tokio::test]
    async fn abandoned_construction_leaves_no_slot() {
        let fs = router();
        fs.register(
            Registration::new("slow", ["slow"], |_outer: VPath| -> ConstructFuture {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, VfsError>(Arc::new(MemoryFs::new()) as Arc<dyn Filesystem>)
                })
            }),
        )
        .unwrap();
        fs.parent().write_all("/big.slow", b"").await.unwrap();

        let attempt = tokio::time::timeout(Duration::from_millis(10), fs.list("/big.slow::"));
        assert!(attempt.await.is_err());
        assert!(fs.cache.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn waiting_caller_takes_over_abandoned_construction() {
        let attempts = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&attempts);
        let fs = Arc::new(router());
        fs.register(Registration::new(
            "slow",
            ["slow"],
            move |_outer: VPath| -> ConstructFuture {
                let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
                Box::pin(async move {
                    if first {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    }
                    Ok::<_, VfsError>(Arc::new(MemoryFs::new()) as Arc<dyn Filesystem>)
                })
            },
        ))
        .unwrap();
        fs.parent().write_all("/big.slow", b"").await.unwrap();

        let first = tokio::spawn({
            let fs = Arc::clone(&fs);
            async move { fs.delegate("/big.slow").await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = tokio::spawn({
            let fs = Arc::clone(&fs);
            async move { fs.delegate("/big.slow").await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());

        let delegate = tokio::time::timeout(Duration::from_secs(5), second)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        // the waiter filled the original slot rather than a new one
        assert_eq!(
            fs.validity_token("/big.slow").unwrap(),
            Some(delegate.token())
        );

        let again = fs.delegate("/big.slow").await.unwrap();
        assert_eq!(again.token(), delegate.token());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn virtual_listing_mode_opens_root() {
        let fs = router().with_listing(ListingMode::Virtual);
        let names = fs.list_names("/poem.lines").await.unwrap();
        assert_eq!(names, vec!["/poem.lines::line0", "/poem.lines::line1"]);
        // unregistered extensions still list as plain files
        assert_eq!(fs.list_names("/notes.txt").await.unwrap(), vec!["/notes.txt"]);
    }

    #[tokio::test]
    async fn glob_inside_delegate() {
        let fs = router();
        let listing = fs.glob("/poem.lines::line*", false).await.unwrap();
        assert_eq!(
            listing.names(),
            vec!["/poem.lines::line0", "/poem.lines::line1"]
        );
        assert!(fs.glob("/*.lines::line*", false).await.is_err());
    }

    struct ReadOnly(MemoryFs);

    #[async_trait]
    impl Filesystem for ReadOnly {
        fn name(&self) -> &str {
            "read-only"
        }

        async fn list(&self, path: &str) -> VfsResult<Vec<InfoRecord>> {
            self.0.list(path).await
        }

        async fn info(&self, path: &str) -> VfsResult<InfoRecord> {
            self.0.info(path).await
        }

        async fn read_all(&self, path: &str) -> VfsResult<Vec<u8>> {
            self.0.read_all(path).await
        }
    }
}
