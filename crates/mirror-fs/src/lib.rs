//! Physical filesystem layer for Mirror Manager
//!
//! Provides the identity, naming, and probing primitives the reconciliation
//! engine uses to observe physical trees: filesystem identifiers, normalized
//! logical paths paired with physical paths, the ignore filter, per-root
//! capability probing, and bounded streaming content hashing.

pub mod constants;
pub mod error;
pub mod fid;
pub mod hash;
pub mod ignore;
pub mod path;
pub mod probe;

pub use constants::{ControlName, RESERVED_PREFIX, is_reserved_name};
pub use error::{Error, Result};
pub use fid::Fid;
pub use hash::{ContentHash, hash_file_bounded};
pub use ignore::IgnoreFilter;
pub use path::{LogicalPath, PathPair};
pub use probe::{FsCapabilities, fs_equivalent, probe};

use std::path::{Path, PathBuf};

/// Canonicalize a root anchor path for registration.
///
/// Uses `dunce` so Windows paths do not come back in extended-length form.
pub fn canonicalize_anchor(path: &Path) -> Result<PathBuf> {
    dunce::canonicalize(path).map_err(|e| Error::io(path, e))
}
