//! Ignore filter for physical names that never map to logical objects.
//!
//! OS metadata droppings, editor lock files, and our own control files must
//! never influence the logical mapping. The filter is a pure predicate over
//! a single name component.

use std::ffi::OsStr;

use crate::constants::is_reserved_name;

/// OS metadata files that appear inside synced trees uninvited.
const OS_JUNK: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

/// Filter for physical names excluded from reconciliation.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreFilter;

impl IgnoreFilter {
    pub fn new() -> Self {
        Self
    }

    /// Whether a single name component must be ignored.
    ///
    /// Names that are not valid UTF-8 are ignored: the logical store
    /// requires representable names, and a later rename notification will
    /// pick the object up if it becomes representable.
    pub fn is_ignored(&self, name: &OsStr) -> bool {
        let Some(name) = name.to_str() else {
            return true;
        };
        self.is_ignored_str(name)
    }

    /// UTF-8 variant of [`Self::is_ignored`].
    pub fn is_ignored_str(&self, name: &str) -> bool {
        if name.is_empty() || is_reserved_name(name) {
            return true;
        }
        if OS_JUNK.contains(&name) {
            return true;
        }
        // Emacs lock files ( .#foo ) vanish too fast to be worth tracking.
        name.starts_with(".#")
    }
}
