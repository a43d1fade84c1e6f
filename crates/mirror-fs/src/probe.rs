//! Filesystem capability probing.
//!
//! Case- and normalization-insensitivity are properties of the filesystem a
//! root lives on, probed once at root creation by writing a control file and
//! re-statting it under a folded spelling. The comparison goes through FIDs
//! rather than name strings, so the filesystem itself answers the question.

use std::fs::OpenOptions;
use std::path::Path;

use tracing::debug;

use crate::constants::ControlName;
use crate::fid::Fid;
use crate::{Error, Result};

/// Capability bits for the filesystem backing one root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsCapabilities {
    /// Names differing only by case resolve to the same object
    pub case_insensitive: bool,
    /// Names differing only by Unicode normalization form resolve to the
    /// same object
    pub norm_insensitive: bool,
}

impl FsCapabilities {
    /// Capabilities of a fully sensitive filesystem (ext4 defaults).
    pub fn sensitive() -> Self {
        Self::default()
    }

    /// Whether two name components are equivalent on this filesystem.
    ///
    /// Normalization equivalence is intentionally not folded in string
    /// space; callers that need it compare FIDs of the two spellings via
    /// [`fs_equivalent`].
    pub fn names_equivalent(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        self.case_insensitive && a.to_lowercase() == b.to_lowercase()
    }
}

/// Whether two physical paths currently resolve to the same object.
///
/// Both paths are statted fresh; any failure means "not equivalent".
pub fn fs_equivalent(a: &Path, b: &Path) -> bool {
    match (Fid::from_path(a), Fid::from_path(b)) {
        (Ok(fa), Ok(fb)) => fa == fb,
        _ => false,
    }
}

/// Probe the filesystem under `root` for its capability bits.
///
/// Writes a reserved-prefix scratch file, stats it under folded spellings,
/// and removes it again. The scratch names are covered by the ignore filter
/// so a concurrent scan never sees them as user content.
///
/// # Errors
///
/// Returns [`Error::ProbeFailed`] if the scratch file cannot be created or
/// its own spelling does not stat back, which indicates something much worse
/// than an exotic filesystem.
pub fn probe(root: &Path) -> Result<FsCapabilities> {
    let case_name = ControlName::ProbeCase.as_str();
    let case = probe_one(root, case_name, &case_name.to_lowercase())?;
    let norm = probe_one(root, &nfd_probe_name(), &nfc_probe_name())?;

    let capabilities = FsCapabilities {
        case_insensitive: case,
        norm_insensitive: norm,
    };
    debug!(root = %root.display(), ?capabilities, "Probed filesystem capabilities");
    Ok(capabilities)
}

/// "é" spelled as base letter plus combining acute accent.
fn nfd_probe_name() -> String {
    format!("{}-e\u{0301}", ControlName::ProbeNorm.as_str())
}

/// "é" spelled as the precomposed code point.
fn nfc_probe_name() -> String {
    format!("{}-\u{00e9}", ControlName::ProbeNorm.as_str())
}

fn probe_one(root: &Path, written: &str, folded: &str) -> Result<bool> {
    let written_path = root.join(written);
    let folded_path = root.join(folded);

    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&written_path)
        .map_err(|e| Error::ProbeFailed {
            path: written_path.clone(),
            message: format!("cannot create probe file: {}", e),
        })?;

    let written_fid = Fid::from_path(&written_path).map_err(|_| Error::ProbeFailed {
        path: written_path.clone(),
        message: "probe file vanished".to_string(),
    });

    let insensitive = match &written_fid {
        Ok(fid) => match Fid::from_path(&folded_path) {
            Ok(folded_fid) => folded_fid == *fid,
            Err(_) => false,
        },
        Err(_) => false,
    };

    let _ = std::fs::remove_file(&written_path);
    written_fid?;

    Ok(insensitive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn probe_cleans_up_scratch_files() {
        let dir = tempfile::tempdir().unwrap();
        probe(dir.path()).unwrap();

        let leftover: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftover.is_empty(), "probe left files behind: {leftover:?}");
    }

    #[test]
    fn probe_is_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let first = probe(dir.path()).unwrap();
        let second = probe(dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn names_equivalent_exact_match() {
        let caps = FsCapabilities::sensitive();
        assert!(caps.names_equivalent("a.txt", "a.txt"));
        assert!(!caps.names_equivalent("a.txt", "A.TXT"));
    }

    #[test]
    fn names_equivalent_case_folding() {
        let caps = FsCapabilities {
            case_insensitive: true,
            norm_insensitive: false,
        };
        assert!(caps.names_equivalent("a.txt", "A.TXT"));
        assert!(!caps.names_equivalent("a.txt", "b.txt"));
    }

    #[test]
    fn fs_equivalent_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x");
        fs::write(&path, "x").unwrap();
        assert!(fs_equivalent(&path, &path));
    }

    #[cfg(unix)]
    #[test]
    fn fs_equivalent_hardlinks() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, "x").unwrap();
        fs::hard_link(&a, &b).unwrap();
        assert!(fs_equivalent(&a, &b));
    }

    #[test]
    fn fs_equivalent_missing_path_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        fs::write(&a, "x").unwrap();
        assert!(!fs_equivalent(&a, &dir.path().join("gone")));
    }
}
