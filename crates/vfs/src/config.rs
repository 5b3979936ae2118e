//! Configuration for the filesystem layer
//!
//! Reads config from ~/.config/strata-vfs/config.toml

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{VfsError, VfsResult};
use crate::path::DEFAULT_SEPARATOR;
use crate::registry::DEFAULT_PROBE_BYTES;

/// Upper bound on blocking pool size
pub const MAX_WORKERS: usize = 64;

/// What a plain `list` of a registered outer file returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingMode {
    /// A single record for the file itself
    #[default]
    Plain,
    /// The root of the sub-filesystem built over the file
    Virtual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Blocking pool size for bridged backends
    pub workers: usize,
    /// Composite path separator
    pub separator: String,
    pub listing: ListingMode,
    /// Leading bytes read for content sniffing
    pub probe_bytes: usize,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            separator: DEFAULT_SEPARATOR.to_string(),
            listing: ListingMode::Plain,
            probe_bytes: DEFAULT_PROBE_BYTES,
        }
    }
}

impl VfsConfig {
    /// Load configuration from default path; defaults if the file is absent
    pub fn load() -> VfsResult<Self> {
        Self::load_from_path(&Self::default_config_path())
    }

    /// Get default config path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("strata-vfs")
            .join("config.toml")
    }

    pub fn load_from_path(path: &Path) -> VfsResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => content.parse::<Self>().map_err(|e| match e {
                VfsError::Config(msg) => VfsError::Config(format!("{}: {msg}", path.display())),
                other => other,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(VfsError::Config(format!("{}: {e}", path.display()))),
        }
    }

    /// Reject unusable separators and probe sizes. `workers` is clamped
    /// rather than rejected, see [`Self::effective_workers`].
    pub fn validate(&self) -> VfsResult<()> {
        if self.separator.is_empty() {
            return Err(VfsError::Config("separator must not be empty".into()));
        }
        if self.separator.contains('/') {
            return Err(VfsError::Config(format!(
                "separator {:?} must not contain '/'",
                self.separator
            )));
        }
        if self.probe_bytes == 0 {
            return Err(VfsError::Config("probe_bytes must be positive".into()));
        }
        Ok(())
    }

    /// Pool size actually used
    pub fn effective_workers(&self) -> usize {
        self.workers.clamp(1, MAX_WORKERS)
    }
}

impl FromStr for VfsConfig {
    type Err = VfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Self = toml::from_str(s).map_err(|e| VfsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
