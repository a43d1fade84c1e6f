//! Logical paths and path pairs.
//!
//! A [`LogicalPath`] is a store-relative path normalized to forward slashes,
//! independent of how the platform spells the physical path. A [`PathPair`]
//! carries the logical path together with the absolute physical path it was
//! derived from, so callers convert between the two exactly once per
//! observation.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// A store-relative path normalized to forward slashes.
///
/// The empty path denotes the store root. Internal representation always
/// uses forward slashes; conversion to platform-native form happens only at
/// I/O boundaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LogicalPath {
    inner: String,
}

impl LogicalPath {
    /// The store root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Create a LogicalPath from a relative path string.
    ///
    /// Converts backslashes to forward slashes and strips redundant
    /// separators.
    pub fn new(path: &str) -> Self {
        let replaced = path.replace('\\', "/");
        let inner = replaced
            .split('/')
            .filter(|c| !c.is_empty() && *c != ".")
            .collect::<Vec<_>>()
            .join("/");
        Self { inner }
    }

    /// Whether this is the store root.
    pub fn is_root(&self) -> bool {
        self.inner.is_empty()
    }

    /// Get the internal normalized string representation.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Join this path with a child name.
    pub fn join(&self, name: &str) -> Self {
        if self.inner.is_empty() {
            Self {
                inner: name.to_string(),
            }
        } else {
            Self {
                inner: format!("{}/{}", self.inner, name),
            }
        }
    }

    /// Get the parent path, or None at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.inner.is_empty() {
            return None;
        }
        match self.inner.rfind('/') {
            Some(idx) => Some(Self {
                inner: self.inner[..idx].to_string(),
            }),
            None => Some(Self::root()),
        }
    }

    /// Get the final name component, or None at the root.
    pub fn name(&self) -> Option<&str> {
        if self.inner.is_empty() {
            None
        } else {
            self.inner.rsplit('/').next()
        }
    }

    /// Iterate over the path components, root first.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.inner.split('/').filter(|c| !c.is_empty())
    }

    /// Resolve this logical path under a physical root directory.
    pub fn to_physical(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for component in self.components() {
            out.push(component);
        }
        out
    }
}

impl std::fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.inner.is_empty() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.inner)
        }
    }
}

impl From<&str> for LogicalPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A logical path and the absolute physical path it corresponds to.
///
/// Two PathPairs are equal iff their logical paths are equal. Physical-path
/// equivalence is filesystem-dependent and must go through
/// [`crate::probe::FsCapabilities`].
#[derive(Debug, Clone)]
pub struct PathPair {
    logical: LogicalPath,
    physical: PathBuf,
}

impl PathPair {
    /// Pair a logical path with the physical root it lives under.
    pub fn from_logical(root: &Path, logical: LogicalPath) -> Self {
        let physical = logical.to_physical(root);
        Self { logical, physical }
    }

    /// Derive the pair for an absolute physical path under `root`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutsideRoot`] if `physical` is not under `root`, and
    /// [`Error::InvalidEncoding`] if any component is not valid UTF-8.
    pub fn under_root(root: &Path, physical: &Path) -> Result<Self> {
        let rel = physical
            .strip_prefix(root)
            .map_err(|_| Error::OutsideRoot {
                path: physical.to_path_buf(),
                root: root.to_path_buf(),
            })?;

        let mut logical = LogicalPath::root();
        for component in rel.components() {
            let name = component
                .as_os_str()
                .to_str()
                .ok_or_else(|| Error::InvalidEncoding {
                    path: physical.to_path_buf(),
                })?;
            logical = logical.join(name);
        }

        Ok(Self {
            logical,
            physical: physical.to_path_buf(),
        })
    }

    pub fn logical(&self) -> &LogicalPath {
        &self.logical
    }

    pub fn physical(&self) -> &Path {
        &self.physical
    }

    /// Final name component, or None at the root.
    pub fn name(&self) -> Option<&str> {
        self.logical.name()
    }

    /// The pair for a child of this path.
    pub fn child(&self, name: &str) -> Self {
        Self {
            logical: self.logical.join(name),
            physical: self.physical.join(name),
        }
    }

    /// The pair for the parent of this path, or None at the root.
    pub fn parent(&self) -> Option<Self> {
        let logical = self.logical.parent()?;
        let physical = self.physical.parent()?.to_path_buf();
        Some(Self { logical, physical })
    }
}

impl PartialEq for PathPair {
    fn eq(&self, other: &Self) -> bool {
        self.logical == other.logical
    }
}

impl Eq for PathPair {}

impl std::hash::Hash for PathPair {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.logical.hash(state);
    }
}

impl std::fmt::Display for PathPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.logical, self.physical.display())
    }
}
