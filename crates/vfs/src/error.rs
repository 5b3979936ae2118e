//! VFS error types.

use std::io;

use thiserror::Error;

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// Path absent on a concrete backend.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Malformed or escaping path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Operation not implemented by a capability-limited backend.
    #[error("{operation} not supported by {backend}")]
    Unsupported {
        operation: &'static str,
        backend: String,
    },

    /// The outer file of a composite path exists but no registered
    /// sub-filesystem accepts it.
    #[error("no delegate for {outer} (extension {extension:?}, attempted: [{}])", attempted.join(", "))]
    NoDelegateMatch {
        outer: String,
        extension: Option<String>,
        attempted: Vec<String>,
    },

    /// Caller-initiated cancellation.
    #[error("operation cancelled")]
    Cancelled,

    /// Opaque lower-level failure.
    #[error("{backend} failed on {path}: {source}")]
    BackendFailure {
        backend: String,
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create an Unsupported error.
    pub fn unsupported(operation: &'static str, backend: impl Into<String>) -> Self {
        Self::Unsupported {
            operation,
            backend: backend.into(),
        }
    }

    /// Wrap an arbitrary failure with backend identity and path.
    pub fn backend(
        backend: impl Into<String>,
        path: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::BackendFailure {
            backend: backend.into(),
            path: path.into(),
            source: source.into(),
        }
    }

    /// Map an I/O error by kind, keeping backend identity for opaque failures.
    pub fn from_io(backend: &str, path: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::not_found(path),
            io::ErrorKind::AlreadyExists => Self::already_exists(path),
            io::ErrorKind::NotADirectory => Self::not_a_directory(path),
            io::ErrorKind::IsADirectory => Self::is_a_directory(path),
            _ => Self::backend(backend, path, err),
        }
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// True for `NotFound` only; `NoDelegateMatch` is deliberately distinct.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
