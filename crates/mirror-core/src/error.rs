//! Error types for mirror-core

use std::path::PathBuf;

use mirror_store::StoreId;

/// Result type for mirror-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in mirror-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No root is linked for this store
    #[error("No root linked for store {store}")]
    RootNotFound { store: StoreId },

    /// A root is already linked at this path
    #[error("A root is already linked at {path}")]
    RootExists { path: PathBuf },

    /// The path is not under any linked root
    #[error("Path {path} is not under any linked root")]
    NoRootForPath { path: PathBuf },

    /// Logical and physical state disagree in a way reconciliation cannot
    /// repair locally; the caller escalates to a full rescan
    #[error("Inconsistent state at {path}: {message}")]
    Inconsistent { path: PathBuf, message: String },

    /// Filesystem error from mirror-fs
    #[error(transparent)]
    Fs(#[from] mirror_fs::Error),

    /// Logical store error from mirror-store
    #[error(transparent)]
    Store(#[from] mirror_store::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// TOML deserialization error
    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}

impl Error {
    /// Whether this error is an expected race the engine recovers from by
    /// ignoring the current notification.
    pub fn is_benign(&self) -> bool {
        match self {
            Self::Fs(e) => e.is_benign(),
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            _ => false,
        }
    }
}
