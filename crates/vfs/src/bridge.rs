//! Sync-to-async bridge.
//!
//! Backends that only offer blocking I/O implement [`SyncFilesystem`] and are
//! exposed as a [`Filesystem`] through [`SyncBridge`]. Every call is shipped
//! to an [`Offload`] executor; [`BlockingPool`] bounds how many blocking calls
//! run at once, [`InlineOffload`] runs them one at a time on the caller for
//! deterministic tests.
//!
//! A dispatched blocking call cannot be interrupted. If the awaiting future is
//! dropped the call still runs to completion, its result is discarded and its
//! pool slot is released when it returns.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::backend::{Capabilities, Filesystem};
use crate::error::{VfsError, VfsResult};
use crate::info::{InfoRecord, RawInfo};

/// Blocking filesystem backend.
///
/// Info is returned in the backend's native shape and normalized by the
/// bridge. Mutations default to `Unsupported`.
pub trait SyncFilesystem: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn list(&self, path: &str) -> VfsResult<Vec<RawInfo>>;

    fn info(&self, path: &str) -> VfsResult<RawInfo>;

    fn read_all(&self, path: &str) -> VfsResult<Vec<u8>>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::READ_ONLY
    }

    fn write_all(&self, _path: &str, _data: &[u8]) -> VfsResult<()> {
        Err(VfsError::unsupported("write", self.name()))
    }

    fn make_dirs(&self, _path: &str, _exist_ok: bool) -> VfsResult<()> {
        Err(VfsError::unsupported("make_dirs", self.name()))
    }

    fn remove(&self, _path: &str) -> VfsResult<()> {
        Err(VfsError::unsupported("remove", self.name()))
    }

    fn read_prefix(&self, path: &str, len: usize) -> VfsResult<Vec<u8>> {
        let mut data = self.read_all(path)?;
        data.truncate(len);
        Ok(data)
    }
}

/// Unit of blocking work handed to an [`Offload`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Executor for blocking jobs.
#[async_trait]
pub trait Offload: Send + Sync {
    /// Run `job` to completion off the cooperative scheduler.
    async fn submit(&self, job: Job) -> VfsResult<()>;

    /// Maximum number of jobs running at once
    fn capacity(&self) -> usize;
}

/// Bounded pool on top of tokio's blocking threads.
///
/// A job first waits for one of `size` permits, then runs on
/// `spawn_blocking` holding that permit until it returns.
#[derive(Debug, Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl BlockingPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl Offload for BlockingPool {
    async fn submit(&self, job: Job) -> VfsResult<()> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| VfsError::Cancelled)?;
        trace!(available = self.permits.available_permits(), "dispatching blocking job");

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit; // Hold permit until done
            job();
        });
        match handle.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Err(VfsError::Cancelled),
            Err(e) => Err(VfsError::other(format!("blocking job panicked: {e}"))),
        }
    }

    fn capacity(&self) -> usize {
        self.size
    }
}

/// Single-slot executor that runs jobs inline on the awaiting task.
///
/// Jobs execute strictly one after another in submission order, which makes
/// test interleavings reproducible. Not for production use: it blocks the
/// scheduler thread for the duration of each job.
#[derive(Debug, Default)]
pub struct InlineOffload {
    slot: Mutex<()>,
}

impl InlineOffload {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Offload for InlineOffload {
    async fn submit(&self, job: Job) -> VfsResult<()> {
        let _slot = self.slot.lock().await;
        job();
        Ok(())
    }

    fn capacity(&self) -> usize {
        1
    }
}

/// Run a blocking closure on `offload` and hand back its result.
pub async fn run_blocking<T, F>(offload: &dyn Offload, f: F) -> VfsResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> VfsResult<T> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    offload
        .submit(Box::new(move || {
            // receiver gone means the caller stopped waiting
            let _ = tx.send(f());
        }))
        .await?;
    rx.await
        .map_err(|_| VfsError::other("blocking job finished without a result"))?
}

/// Race `fut` against `token`; a fired token yields `Cancelled`.
pub async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> VfsResult<T>
where
    F: Future<Output = VfsResult<T>>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(VfsError::Cancelled),
        result = fut => result,
    }
}

/// Exposes a [`SyncFilesystem`] through the async [`Filesystem`] contract.
pub struct SyncBridge<B: SyncFilesystem> {
    backend: Arc<B>,
    offload: Arc<dyn Offload>,
}

impl<B: SyncFilesystem> SyncBridge<B> {
    pub fn new(backend: B, offload: Arc<dyn Offload>) -> Self {
        Self {
            backend: Arc::new(backend),
            offload,
        }
    }

    /// Bridge with its own bounded pool of `workers` slots
    pub fn with_workers(backend: B, workers: usize) -> Self {
        Self::new(backend, Arc::new(BlockingPool::new(workers)))
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn offload(&self) -> &Arc<dyn Offload> {
        &self.offload
    }

    async fn call<T, F>(&self, path: &str, f: F) -> VfsResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&B, &str) -> VfsResult<T> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        let path = path.to_string();
        run_blocking(self.offload.as_ref(), move || f(&backend, &path)).await
    }
}

#[async_trait]
impl<B: SyncFilesystem> Filesystem for SyncBridge<B> {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    async fn list(&self, path: &str) -> VfsResult<Vec<InfoRecord>> {
        let raw = self.call(path, |b, p| b.list(p)).await?;
        Ok(raw
            .into_iter()
            .map(|entry| InfoRecord::from_raw(entry, ""))
            .collect())
    }

    async fn info(&self, path: &str) -> VfsResult<InfoRecord> {
        let raw = self.call(path, |b, p| b.info(p)).await?;
        Ok(InfoRecord::from_raw(raw, path))
    }

    async fn read_all(&self, path: &str) -> VfsResult<Vec<u8>> {
        self.call(path, |b, p| b.read_all(p)).await
    }

    async fn read_prefix(&self, path: &str, len: usize) -> VfsResult<Vec<u8>> {
        self.call(path, move |b, p| b.read_prefix(p, len)).await
    }

    async fn write_all(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        if !self.backend.capabilities().write {
            return Err(VfsError::unsupported("write", self.backend.name()));
        }
        let data = data.to_vec();
        self.call(path, move |b, p| b.write_all(p, &data)).await
    }

    async fn make_dirs(&self, path: &str, exist_ok: bool) -> VfsResult<()> {
        self.call(path, move |b, p| b.make_dirs(p, exist_ok)).await
    }

    async fn remove(&self, path: &str) -> VfsResult<()> {
        self.call(path, |b, p| b.remove(p)).await
    }
}
