//! Filesystem identifiers.
//!
//! A [`Fid`] is the identity the filesystem assigns to a physical object,
//! packed from device and inode numbers on Unix. Filesystems may reuse these
//! after a delete, so a Fid is evidence of identity, never proof; the
//! reconciliation engine cross-checks before trusting one.

use std::fs::Metadata;
use std::path::Path;

use crate::{Error, Result};

/// Opaque 16-byte physical-object identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fid([u8; 16]);

impl Fid {
    /// Build a Fid from already-fetched metadata.
    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&metadata.dev().to_le_bytes());
        bytes[8..].copy_from_slice(&metadata.ino().to_le_bytes());
        Ok(Self(bytes))
    }

    #[cfg(not(unix))]
    pub fn from_metadata(_metadata: &Metadata) -> Result<Self> {
        Err(Error::FidUnsupported)
    }

    /// Stat `path` (without following a final symlink) and return its Fid.
    pub fn from_path(path: &Path) -> Result<Self> {
        let metadata =
            std::fs::symlink_metadata(path).map_err(|e| Error::io(path, e))?;
        Self::from_metadata(&metadata)
    }

    /// Generate a random Fid.
    ///
    /// Used to rebind a logical object away from a physical identity it can
    /// no longer be trusted to own.
    pub fn random() -> Self {
        Self(rand::random::<[u8; 16]>())
    }

    /// Raw byte representation.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<[u8; 16]> for Fid {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for Fid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fid(")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

impl std::fmt::Display for Fid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
