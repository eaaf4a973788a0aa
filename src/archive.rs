//! Tar archive codec
//!
//! The engine treats archives as opaque: `pack` turns a directory tree
//! into a readable tar stream, `unpack` materializes one into a
//! directory. Layer contents and export streams both go through here.

use crate::error::{CaskError, Result};
use std::io::{Cursor, Read};
use std::path::Path;

/// A packed directory tree, readable as an uncompressed tar stream.
pub type Archive = Box<dyn Read + Send>;

/// Pack a directory tree into a tar stream.
pub fn pack(dir: &Path) -> Result<Archive> {
    if !dir.is_dir() {
        return Err(CaskError::Image(format!(
            "Cannot pack {}: not a directory",
            dir.display()
        )));
    }
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", dir)?;
    let data = builder.into_inner()?;
    Ok(Box::new(Cursor::new(data)))
}

/// Unpack a tar stream into a directory, creating it if needed.
pub fn unpack<R: Read>(archive: R, target: &Path) -> Result<()> {
    std::fs::create_dir_all(target)?;
    let mut ar = tar::Archive::new(archive);
    ar.set_preserve_permissions(true);
    ar.unpack(target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_pack_unpack_round_trip() {
        let src = tempdir().unwrap();
        std::fs::create_dir(src.path().join("etc")).unwrap();
        std::fs::write(src.path().join("etc/hosts"), b"127.0.0.1 localhost\n").unwrap();
        std::fs::write(src.path().join("motd"), b"hello\n").unwrap();

        let tarball = pack(src.path()).unwrap();

        let dst = tempdir().unwrap();
        unpack(tarball, &dst.path().join("layer")).unwrap();

        let hosts = std::fs::read(dst.path().join("layer/etc/hosts")).unwrap();
        assert_eq!(hosts, b"127.0.0.1 localhost\n");
        let motd = std::fs::read(dst.path().join("layer/motd")).unwrap();
        assert_eq!(motd, b"hello\n");
    }

    #[test]
    fn test_pack_missing_directory() {
        let dir = tempdir().unwrap();
        assert!(pack(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn test_unpack_creates_target() {
        let src = tempdir().unwrap();
        std::fs::write(src.path().join("f"), b"x").unwrap();
        let tarball = pack(src.path()).unwrap();

        let dst = tempdir().unwrap();
        let deep = dst.path().join("a/b/c");
        unpack(tarball, &deep).unwrap();
        assert!(deep.join("f").exists());
    }
}
