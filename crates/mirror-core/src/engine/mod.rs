//! The reconciliation engines.
//!
//! [`create::CreateEngine`] decides what a "might have been created"
//! observation means, [`delete::DeleteEngine`] decides whether a vanished
//! path should enter the deletion buffer, and [`executor::Executor`]
//! applies the decided operations transactionally.

pub mod create;
pub mod delete;
pub mod executor;

pub use create::{CreateEngine, Decision};
pub use delete::DeleteEngine;
pub use executor::Executor;

use std::fs::Metadata;
use std::path::Path;
use std::time::SystemTime;

use mirror_fs::Fid;

/// How a physical operation decided by the engine is meant to be realized.
///
/// The distinction belongs to the physical-operation layer outside this
/// engine; it is carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalOpMode {
    /// Perform the operation on the filesystem now
    Apply,
    /// Record the mapping only
    Map,
}

/// What one stat told us about a physical object.
#[derive(Debug, Clone, Copy)]
pub struct PhysicalFacts {
    pub fid: Fid,
    pub is_dir: bool,
    pub length: u64,
    pub mtime: SystemTime,
}

impl PhysicalFacts {
    pub fn from_metadata(path: &Path, metadata: &Metadata) -> mirror_fs::Result<Self> {
        Ok(Self {
            fid: Fid::from_metadata(metadata)?,
            is_dir: metadata.is_dir(),
            length: metadata.len(),
            mtime: metadata
                .modified()
                .map_err(|e| mirror_fs::Error::io(path, e))?,
        })
    }
}
