//! Streaming content hashing.
//!
//! Provides the canonical checksum format (`sha256:<hex>`) used for content
//! change detection, computed in bounded reads so a worker can abort midway
//! and never read past the length it was promised.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Prefix for all checksums produced by this module
const PREFIX: &str = "sha256:";

/// Read granularity; also the abort-check granularity.
const CHUNK: usize = 64 * 1024;

/// A canonical content checksum in `sha256:<hex>` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Compute the hash of an in-memory byte slice.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("{}{:x}", PREFIX, hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash a file's content, bounded by the length the caller observed.
///
/// The read loop checks `abort` between chunks and fails fast if the file
/// turns out to be longer or shorter than `expected_len`; either means the
/// observation the request was built from is stale.
///
/// # Errors
///
/// [`Error::HashAborted`] when the abort flag is raised,
/// [`Error::LengthExceeded`] / [`Error::LengthMismatch`] when the file does
/// not match `expected_len`, and [`Error::Io`] for read failures.
pub fn hash_file_bounded(
    path: &Path,
    expected_len: u64,
    abort: &AtomicBool,
) -> Result<ContentHash> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK];
    let mut total: u64 = 0;

    loop {
        if abort.load(Ordering::Relaxed) {
            return Err(Error::HashAborted {
                path: path.to_path_buf(),
            });
        }

        let read = file.read(&mut buf).map_err(|e| Error::io(path, e))?;
        if read == 0 {
            break;
        }

        total += read as u64;
        if total > expected_len {
            return Err(Error::LengthExceeded {
                path: path.to_path_buf(),
                expected: expected_len,
            });
        }
        hasher.update(&buf[..read]);
    }

    if total != expected_len {
        return Err(Error::LengthMismatch {
            path: path.to_path_buf(),
            expected: expected_len,
            actual: total,
        });
    }

    Ok(ContentHash(format!("{}{:x}", PREFIX, hasher.finalize())))
}
