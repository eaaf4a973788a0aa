//! Layered filesystem primitive
//!
//! Stacks read-only image layers over a private read-write layer at a
//! mount point, and tears the stack down again. The union driver holds
//! the mount-point directory for a while after unmount, so removal is
//! retried.

use crate::error::{CaskError, Result};
use crate::syscall;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::Duration;

/// How many times to retry removing an unmounted mount point.
const UNMOUNT_RETRIES: u32 = 1000;

/// Delay between mount-point removal attempts.
const UNMOUNT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Mount read-only layers over a read-write layer at the target.
///
/// The left-most branch wins on conflicts: the read-write layer first,
/// then the layers child-first.
pub fn mount_layered(ro_layers: &[impl AsRef<Path>], rw: &Path, target: &Path) -> Result<()> {
    let mut branches = format!("br:{}=rw", rw.display());
    for layer in ro_layers {
        branches.push_str(&format!(":{}=ro", layer.as_ref().display()));
    }

    let target_str = target.to_string_lossy();
    syscall::mount(Some("none"), &target_str, Some("aufs"), 0, Some(&branches))
        .map_err(|e| CaskError::Mount(format!("Failed to mount layers at {}: {}", target.display(), e)))
}

/// Unmount the target, then remove the mount-point directory.
///
/// The filesystem may keep the directory busy after the unmount returns;
/// removal is retried until it succeeds or the attempt budget runs out.
/// A missing directory counts as success.
pub fn unmount(target: &Path) -> Result<()> {
    let target_str = target.to_string_lossy();
    syscall::umount2(&target_str, 0)
        .map_err(|e| CaskError::Mount(format!("Failed to unmount {}: {}", target.display(), e)))?;

    for _ in 0..UNMOUNT_RETRIES {
        match std::fs::remove_dir(target) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(_) => std::thread::sleep(UNMOUNT_RETRY_DELAY),
        }
    }
    Err(CaskError::Mount(format!(
        "Failed to remove mount point {}",
        target.display()
    )))
}

/// Check whether a path is a mount point.
///
/// True iff the path's device id differs from its parent directory's.
/// A missing path is not a mount point.
pub fn is_mount_point(path: &Path) -> Result<bool> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let parent_meta = std::fs::metadata(path.join(".."))?;
    Ok(meta.dev() != parent_meta.dev())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_path_is_not_mount_point() {
        let dir = tempdir().unwrap();
        assert!(!is_mount_point(&dir.path().join("absent")).unwrap());
    }

    #[test]
    fn test_plain_directory_is_not_mount_point() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        assert!(!is_mount_point(&sub).unwrap());
    }

    #[test]
    fn test_proc_is_mount_point() {
        // /proc is mounted on any Linux system the tests run on.
        assert!(is_mount_point(Path::new("/proc")).unwrap());
    }

    #[test]
    fn test_unmount_unmounted_path_fails() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        // Not a mount point, so the unmount syscall itself must fail.
        assert!(unmount(&sub).is_err());
    }
}
