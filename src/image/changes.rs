//! Filesystem changeset computation
//!
//! Compares an upper directory against a stack of lower layers and
//! classifies every divergence as an addition, modification or deletion.
//! Deletions are represented in the upper directory by whiteout files.

use crate::error::{CaskError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix marking a whiteout file in an upper layer.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Kind of change between an upper directory and its lower layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Path exists only in the upper directory
    Add,
    /// Path shadows an entry in a lower layer
    Modify,
    /// Path is whited out in the upper directory
    Delete,
}

/// A single entry in a changeset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Path relative to the filesystem root, with a leading `/`
    pub path: PathBuf,
    /// Classification of the change
    pub kind: ChangeKind,
}

impl std::fmt::Display for Change {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            ChangeKind::Add => "A",
            ChangeKind::Modify => "C",
            ChangeKind::Delete => "D",
        };
        write!(f, "{} {}", kind, self.path.display())
    }
}

/// Compute the changeset of `upper` relative to the stacked `layers`.
///
/// Every entry under `upper` produces one change: a whiteout marker
/// becomes a deletion of the masked path, anything else is an addition,
/// downgraded to a modification when any lower layer already holds the
/// path. Entries are returned in path order.
pub fn changes(layers: &[impl AsRef<Path>], upper: &Path) -> Result<Vec<Change>> {
    let mut result = Vec::new();

    for entry in walkdir::WalkDir::new(upper).sort_by_file_name() {
        let entry = entry.map_err(|e| CaskError::Image(format!("Changeset walk failed: {}", e)))?;
        if entry.path() == upper {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(upper)
            .map_err(|e| CaskError::Image(format!("Changeset walk failed: {}", e)))?;
        let rooted = Path::new("/").join(rel);

        let name = rooted
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        if let Some(original) = name.strip_prefix(WHITEOUT_PREFIX) {
            let parent = rooted.parent().unwrap_or_else(|| Path::new("/"));
            result.push(Change {
                path: parent.join(original),
                kind: ChangeKind::Delete,
            });
            continue;
        }

        let mut kind = ChangeKind::Add;
        for layer in layers {
            if layer.as_ref().join(rel).symlink_metadata().is_ok() {
                kind = ChangeKind::Modify;
                break;
            }
        }
        result.push(Change { path: rooted, kind });
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_addition() {
        let layer = tempdir().unwrap();
        let upper = tempdir().unwrap();
        std::fs::write(upper.path().join("new.txt"), b"x").unwrap();

        let cs = changes(&[layer.path()], upper.path()).unwrap();
        assert_eq!(cs.len(), 1);
        assert_eq!(cs[0].path, Path::new("/new.txt"));
        assert_eq!(cs[0].kind, ChangeKind::Add);
    }

    #[test]
    fn test_modification() {
        let layer = tempdir().unwrap();
        std::fs::write(layer.path().join("shared.txt"), b"old").unwrap();
        let upper = tempdir().unwrap();
        std::fs::write(upper.path().join("shared.txt"), b"new").unwrap();

        let cs = changes(&[layer.path()], upper.path()).unwrap();
        assert_eq!(cs.len(), 1);
        assert_eq!(cs[0].kind, ChangeKind::Modify);
    }

    #[test]
    fn test_deletion_via_whiteout() {
        let layer = tempdir().unwrap();
        std::fs::create_dir(layer.path().join("a")).unwrap();
        std::fs::write(layer.path().join("a/b.txt"), b"x").unwrap();
        let upper = tempdir().unwrap();
        std::fs::create_dir(upper.path().join("a")).unwrap();
        std::fs::write(upper.path().join("a/.wh.b.txt"), b"").unwrap();

        let cs = changes(&[layer.path()], upper.path()).unwrap();
        let delete = cs.iter().find(|c| c.kind == ChangeKind::Delete).unwrap();
        assert_eq!(delete.path, Path::new("/a/b.txt"));
    }

    #[test]
    fn test_lookup_spans_all_layers() {
        let lower = tempdir().unwrap();
        std::fs::write(lower.path().join("deep.txt"), b"x").unwrap();
        let middle = tempdir().unwrap();
        let upper = tempdir().unwrap();
        std::fs::write(upper.path().join("deep.txt"), b"y").unwrap();

        let cs = changes(&[middle.path(), lower.path()], upper.path()).unwrap();
        assert_eq!(cs[0].kind, ChangeKind::Modify);
    }

    #[test]
    fn test_display() {
        let change = Change {
            path: PathBuf::from("/etc/passwd"),
            kind: ChangeKind::Delete,
        };
        assert_eq!(change.to_string(), "D /etc/passwd");
    }
}
