//! Error types for mirror-fs

use std::io::ErrorKind;
use std::path::PathBuf;

/// Result type for mirror-fs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in mirror-fs operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path is not valid UTF-8: {path}")]
    InvalidEncoding { path: PathBuf },

    #[error("Path {path} is not under root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("Capability probe failed at {path}: {message}")]
    ProbeFailed { path: PathBuf, message: String },

    #[error("File at {path} grew past expected length {expected} while hashing")]
    LengthExceeded { path: PathBuf, expected: u64 },

    #[error("File at {path} changed length while hashing: expected {expected}, read {actual}")]
    LengthMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("Hashing aborted for {path}")]
    HashAborted { path: PathBuf },

    #[error("Filesystem identifiers are not supported on this platform")]
    FidUnsupported,
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is an expected race rather than a real failure.
    ///
    /// Objects vanishing or becoming unreadable between a notification and
    /// the stat that follows it are normal under temp-file churn. Callers
    /// treat these as "ignore this notification" and rely on a later
    /// notification or rescan to converge.
    pub fn is_benign(&self) -> bool {
        match self {
            Self::Io { source, .. } => matches!(
                source.kind(),
                ErrorKind::NotFound | ErrorKind::PermissionDenied
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_benign() {
        let err = Error::io("/tmp/x", std::io::Error::from(ErrorKind::NotFound));
        assert!(err.is_benign());
    }

    #[test]
    fn permission_denied_is_benign() {
        let err = Error::io("/tmp/x", std::io::Error::from(ErrorKind::PermissionDenied));
        assert!(err.is_benign());
    }

    #[test]
    fn other_io_errors_are_not_benign() {
        let err = Error::io("/tmp/x", std::io::Error::from(ErrorKind::InvalidData));
        assert!(!err.is_benign());
    }

    #[test]
    fn probe_failure_is_not_benign() {
        let err = Error::ProbeFailed {
            path: PathBuf::from("/tmp"),
            message: "probe file vanished".to_string(),
        };
        assert!(!err.is_benign());
    }
}
