//! Logical object identity and attributes.
//!
//! A logical object is identified by a [`Soid`] (store plus object id),
//! stable across renames and moves. The physical identity last observed for
//! it is carried as an optional [`Fid`] binding, and file content is tracked
//! per branch so conflict variants can coexist with the master copy.

use std::time::SystemTime;

use mirror_fs::{ContentHash, Fid};
use uuid::Uuid;

/// Identifier of one synchronized store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(pub Uuid);

impl StoreId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Identifier of one logical object within a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub Uuid);

impl ObjectId {
    /// The well-known id of every store's root directory.
    pub const ROOT: ObjectId = ObjectId(Uuid::nil());

    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Composite identifier (store, object) for a logical object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Soid {
    pub store: StoreId,
    pub oid: ObjectId,
}

impl Soid {
    pub fn new(store: StoreId, oid: ObjectId) -> Self {
        Self { store, oid }
    }

    /// The root object of a store.
    pub fn root(store: StoreId) -> Self {
        Self {
            store,
            oid: ObjectId::ROOT,
        }
    }

    pub fn is_root(&self) -> bool {
        self.oid == ObjectId::ROOT
    }
}

impl std::fmt::Display for Soid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.store, self.oid)
    }
}

/// The type of a logical object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    File,
    Dir,
    /// Mount point of another store (shared folder)
    Anchor(StoreId),
}

impl ObjectType {
    /// Whether this object appears as a directory on disk.
    pub fn is_dir_like(&self) -> bool {
        matches!(self, Self::Dir | Self::Anchor(_))
    }

    /// Whether this type matches a physical object of the given kind.
    pub fn matches_physical(&self, physical_is_dir: bool) -> bool {
        self.is_dir_like() == physical_is_dir
    }
}

/// Selects the master or a conflict variant of a file's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Branch(pub u32);

impl Branch {
    pub const MASTER: Branch = Branch(0);

    pub fn is_master(&self) -> bool {
        self.0 == 0
    }
}

/// Sentinel content length meaning "assume the content changed".
///
/// Written when an object is demoted during a replace so the next
/// modification check can never be satisfied by a length+mtime coincidence.
pub const LENGTH_ASSUME_CHANGED: u64 = u64::MAX;

/// Content attributes of one branch of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentAttr {
    pub length: u64,
    pub mtime: SystemTime,
    pub hash: Option<ContentHash>,
}

impl ContentAttr {
    pub fn new(length: u64, mtime: SystemTime) -> Self {
        Self {
            length,
            mtime,
            hash: None,
        }
    }

    /// Attributes that force re-evaluation on the next modification check.
    pub fn assume_changed() -> Self {
        Self {
            length: LENGTH_ASSUME_CHANGED,
            mtime: SystemTime::UNIX_EPOCH,
            hash: None,
        }
    }
}

/// Attributes of a logical object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectAttr {
    pub otype: ObjectType,
    /// Parent object; the root is its own parent.
    pub parent: Soid,
    pub name: String,
    /// Intentionally excluded from physical materialization
    pub expelled: bool,
    /// Name cannot currently be realized on disk due to a collision under
    /// filesystem-insensitive comparison
    pub non_representable: bool,
    /// Last physical identity observed for this object
    pub fid: Option<Fid>,
}

impl ObjectAttr {
    /// Whether this object may currently correspond to a physical one.
    pub fn is_materialized(&self) -> bool {
        !self.expelled && !self.non_representable
    }
}
