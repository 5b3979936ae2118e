//! Probe registry and sub-filesystem resolution.
//!
//! A registration ties a set of extensions to a factory that builds a
//! specialized filesystem over one outer file. Resolution is two-stage: the
//! extension narrows candidates for free, and the outer file's leading bytes
//! are read (once) only when the highest-priority candidate needs a sniff.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use crate::backend::Filesystem;
use crate::error::{VfsError, VfsResult};
use crate::path::VPath;

/// Default number of leading bytes read for content sniffing.
pub const DEFAULT_PROBE_BYTES: usize = 4096;

/// Default priority; lower wins.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Outcome of inspecting a content prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// Definitely handled by this registration
    Match,
    /// Definitely not handled
    NoMatch,
    /// Cannot tell from the prefix
    Unknown,
}

pub type SniffFn = Arc<dyn Fn(&[u8]) -> ProbeResult + Send + Sync>;

pub type ConstructFuture = BoxFuture<'static, VfsResult<Arc<dyn Filesystem>>>;

/// Builds a specialized filesystem over an outer file.
pub trait SubFsFactory: Send + Sync {
    fn construct(&self, outer: VPath) -> ConstructFuture;
}

impl<F> SubFsFactory for F
where
    F: Fn(VPath) -> ConstructFuture + Send + Sync,
{
    fn construct(&self, outer: VPath) -> ConstructFuture {
        self(outer)
    }
}

/// One (extensions, priority, sniff, factory) record.
#[derive(Clone)]
pub struct Registration {
    name: String,
    extensions: BTreeSet<String>,
    priority: i32,
    sniff: Option<SniffFn>,
    probe_size: Option<usize>,
    factory: Arc<dyn SubFsFactory>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("extensions", &self.extensions)
            .field("priority", &self.priority)
            .field("sniffs", &self.sniff.is_some())
            .finish_non_exhaustive()
    }
}

impl Registration {
    /// Extensions are matched case-insensitively, with or without a leading dot.
    pub fn new<I, S>(name: impl Into<String>, extensions: I, factory: impl SubFsFactory + 'static) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            extensions: extensions
                .into_iter()
                .map(|ext| normalize_extension(ext.as_ref()))
                .collect(),
            priority: DEFAULT_PRIORITY,
            sniff: None,
            probe_size: None,
            factory: Arc::new(factory),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn sniff(mut self, sniff: impl Fn(&[u8]) -> ProbeResult + Send + Sync + 'static) -> Self {
        self.sniff = Some(Arc::new(sniff));
        self
    }

    /// Leading bytes this registration's sniff needs
    pub fn probe_size(mut self, bytes: usize) -> Self {
        self.probe_size = Some(bytes);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extensions(&self) -> &BTreeSet<String> {
        &self.extensions
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn sniffs(&self) -> bool {
        self.sniff.is_some()
    }

    pub fn factory(&self) -> &Arc<dyn SubFsFactory> {
        &self.factory
    }

    /// Sniff-free registrations accept any content.
    fn probe(&self, prefix: &[u8]) -> ProbeResult {
        self.sniff.as_ref().map_or(ProbeResult::Match, |sniff| sniff(prefix))
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Append-only table of registrations, indexed by extension.
#[derive(Debug, Clone)]
pub struct ProbeRegistry {
    entries: Vec<Arc<Registration>>,
    by_extension: HashMap<String, Vec<usize>>,
    probe_bytes: usize,
}

impl Default for ProbeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_extension: HashMap::new(),
            probe_bytes: DEFAULT_PROBE_BYTES,
        }
    }

    /// Upper bound on bytes read for sniffing
    pub fn with_probe_bytes(mut self, bytes: usize) -> Self {
        self.probe_bytes = bytes.max(1);
        self
    }

    pub fn register(&mut self, registration: Registration) {
        let idx = self.entries.len();
        for ext in registration.extensions() {
            self.by_extension.entry(ext.clone()).or_default().push(idx);
        }
        debug!(
            name = registration.name(),
            priority = registration.priority(),
            "registered sub-filesystem"
        );
        self.entries.push(Arc::new(registration));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_registered(&self, extension: &str) -> bool {
        self.by_extension.contains_key(&normalize_extension(extension))
    }

    /// Registrations for `extension`, by ascending priority then
    /// registration order.
    pub fn candidates(&self, extension: &str) -> Vec<Arc<Registration>> {
        let mut found: Vec<(usize, Arc<Registration>)> = self
            .by_extension
            .get(&normalize_extension(extension))
            .into_iter()
            .flatten()
            .map(|&idx| (idx, Arc::clone(&self.entries[idx])))
            .collect();
        found.sort_by_key(|(idx, reg)| (reg.priority, *idx));
        found.into_iter().map(|(_, reg)| reg).collect()
    }

    /// Pick the registration for `outer`.
    ///
    /// The prefix read is skipped entirely when the best candidate declares
    /// no sniff. Otherwise candidates are tried in order against one shared
    /// prefix; the first `Match` wins and a sniff-free candidate counts as a
    /// match. `NoMatch` and `Unknown` both move on.
    pub async fn resolve(&self, outer: &VPath) -> VfsResult<Arc<Registration>> {
        let extension = outer.extension();
        let candidates = extension
            .as_deref()
            .map(|ext| self.candidates(ext))
            .unwrap_or_default();

        let no_match = |attempted: &[Arc<Registration>]| VfsError::NoDelegateMatch {
            outer: outer.as_str().to_string(),
            extension: extension.clone(),
            attempted: attempted.iter().map(|r| r.name.clone()).collect(),
        };

        let Some(first) = candidates.first() else {
            return Err(no_match(&[]));
        };
        if !first.sniffs() {
            debug!(outer = %outer, delegate = first.name(), "resolved by extension");
            return Ok(Arc::clone(first));
        }

        let wanted = candidates
            .iter()
            .filter(|r| r.sniffs())
            .map(|r| r.probe_size.unwrap_or(self.probe_bytes))
            .max()
            .unwrap_or(self.probe_bytes)
            .min(self.probe_bytes);
        let prefix = outer.read_prefix(wanted).await?;

        for candidate in &candidates {
            let result = candidate.probe(&prefix);
            debug!(outer = %outer, delegate = candidate.name(), ?result, "sniffed");
            if result == ProbeResult::Match {
                return Ok(Arc::clone(candidate));
            }
        }
        Err(no_match(&candidates))
    }
}
