//! Cross-platform filesystem helpers.
//!
//! On Unix permission bits and symlinks map directly onto the OS. On Windows
//! only the read-only flag survives a round trip, and symlinks are created as
//! file links.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::path::Path;

#[cfg(unix)]
/// Set POSIX permission bits on Unix.
pub fn set_unix_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
/// Maps the owner write bit onto the read-only flag.
pub fn set_unix_permissions(path: &Path, mode: u32) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, perms)
}

/// Permission bits of `metadata`, without the file type bits.
#[cfg(unix)]
pub fn mode_of(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
pub fn mode_of(metadata: &Metadata) -> u32 {
    let base = if metadata.is_dir() { 0o755 } else { 0o644 };
    if metadata.permissions().readonly() {
        base & !0o222
    } else {
        base
    }
}

/// Creates (or truncates) a regular file for writing. The final mode is
/// applied separately once the content is in place.
pub fn create_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// Creates a symlink at `link` pointing to `target`. An existing symlink at
/// `link` is replaced; any other existing object is left alone and reported.
pub fn create_symlink(target: &str, link: &Path) -> io::Result<()> {
    if let Ok(existing) = fs::symlink_metadata(link) {
        if existing.file_type().is_symlink() {
            fs::remove_file(link)?;
        }
    }
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)
    }
    #[cfg(windows)]
    {
        std::os::windows::fs::symlink_file(target, link)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (target, link);
        Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks are not supported on this platform"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[cfg(unix)]
    #[test]
    fn permissions_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        create_file(&path).unwrap();
        set_unix_permissions(&path, 0o640).unwrap();
        assert_eq!(mode_of(&fs::metadata(&path).unwrap()), 0o640);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_is_replaced() {
        let dir = tempdir().unwrap();
        let link = dir.path().join("link");
        create_symlink("first", &link).unwrap();
        create_symlink("second", &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap().to_str(), Some("second"));
    }
}
