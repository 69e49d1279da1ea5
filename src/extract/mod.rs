//! # Restore Pipeline
//!
//! Reads an archive back through the inverse of the backup stack (file,
//! optional decryption, decompression, entry codec) and materializes the
//! entries under a destination directory. [`list`] drives the same stack but
//! only collects the headers.

use crate::archive::EntryReader;
use crate::common::{Entry, EntryKind, EntryStats};
use crate::compress::ZstdStage;
use crate::crypto::{self, EncryptionStage, KdfParams};
use crate::error::{ArchiverError, Result};
use crate::fsx;
use crate::pipeline::{peek_prefix, BoxSource, FileSource, StageStack};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Everything one restore (or list) run needs.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Archive file to read.
    pub source: PathBuf,
    /// Directory the entries are restored under. Created if missing, never cleared.
    /// Ignored by [`list`].
    pub destination: PathBuf,
    /// Must be given exactly when the archive is encrypted.
    pub passphrase: Option<String>,
}

impl RestoreOptions {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self { source: source.into(), destination: destination.into(), passphrase: None }
    }

    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }
}

/// Opens `path` and builds the read-side stack for it.
///
/// The first bytes of the file decide whether the archive is encrypted, so a
/// missing or superfluous passphrase is reported as such instead of surfacing
/// later as a corrupt stream.
pub fn open_archive(path: &Path, passphrase: Option<&str>) -> Result<EntryReader<BoxSource>> {
    let source: BoxSource = Box::new(FileSource::open(path)?);
    let (head, source) = peek_prefix(source, crypto::MAGIC_BYTES.len())?;
    let encrypted = head.as_slice() == crypto::MAGIC_BYTES;

    let mut stack = StageStack::new();
    match (encrypted, passphrase) {
        (true, None) => return Err(ArchiverError::PassphraseRequired),
        (false, Some(_)) => return Err(ArchiverError::NotEncrypted),
        // The KDF costs are taken from the archive header on this side.
        (true, Some(passphrase)) => stack = stack.push(EncryptionStage::new(passphrase, KdfParams::default())),
        (false, None) => {}
    }
    let stack = stack.push(ZstdStage::default());
    tracing::debug!(archive = %path.display(), layers = %stack.describe(), "opening archive");

    EntryReader::new(stack.open_source(source)?)
}

/// Restores the archive at `options.source` into `options.destination`.
///
/// Directories get their stored mode only after every entry is in place,
/// deepest first, so a read-only directory never blocks its own contents.
/// The first error aborts the run; whatever was restored so far stays on disk.
pub fn restore(options: &RestoreOptions) -> Result<EntryStats> {
    let started = Instant::now();
    let mut reader = open_archive(&options.source, options.passphrase.as_deref())?;
    let root = &options.destination;
    fs::create_dir_all(root).map_err(|e| ArchiverError::io(root, e))?;
    tracing::info!(source = %options.source.display(), destination = %root.display(), "starting restore");

    let mut stats = EntryStats::default();
    let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();

    while let Some(entry) = reader.next_entry()? {
        let target = target_path(root, &entry.path);
        tracing::debug!(path = %entry.path, kind = %entry.kind, size = entry.size, "restoring");
        check_ancestors(root, &target, &entry.path)?;

        match entry.kind {
            EntryKind::Dir => {
                if is_symlink(&target) && entry.path != "." {
                    return Err(ArchiverError::UnsafePath(format!("{} (existing symlink in destination)", entry.path)));
                }
                fs::create_dir_all(&target).map_err(|e| ArchiverError::io(&target, e))?;
                dir_modes.push((target, entry.mode));
            }
            EntryKind::File => {
                create_parent(&target)?;
                remove_stale_link(&target)?;
                let mut file = fsx::create_file(&target).map_err(|e| ArchiverError::io(&target, e))?;
                io::copy(&mut reader.payload(), &mut file).map_err(|e| tag_write(e, &target))?;
                drop(file);
                fsx::set_unix_permissions(&target, entry.mode).map_err(|e| ArchiverError::io(&target, e))?;
            }
            EntryKind::Symlink => {
                create_parent(&target)?;
                fsx::create_symlink(&entry.link_target, &target).map_err(|e| ArchiverError::io(&target, e))?;
            }
            EntryKind::Other => {
                let skipped = ArchiverError::UnsupportedEntry { path: entry.path.clone() };
                tracing::debug!(kind = ?skipped.kind(), "{skipped}");
            }
        }
        stats.record(&entry);
    }
    reader.finish()?;

    // Deepest first: a parent's mode may remove the write bit its children need.
    dir_modes.sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));
    for (path, mode) in dir_modes {
        fsx::set_unix_permissions(&path, mode).map_err(|e| ArchiverError::io(&path, e))?;
    }

    tracing::info!(%stats, elapsed = ?started.elapsed(), "restore complete");
    Ok(stats)
}

/// Reads every entry header of the archive at `options.source`.
///
/// Payloads are skipped, but the whole stream is still read so a damaged or
/// tampered archive fails here just as it would on restore.
pub fn list(options: &RestoreOptions) -> Result<Vec<Entry>> {
    let mut reader = open_archive(&options.source, options.passphrase.as_deref())?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry()? {
        entries.push(entry);
    }
    reader.finish()?;
    tracing::debug!(count = entries.len(), "listed archive");
    Ok(entries)
}

/// Maps an archive path onto the destination. `"."` is the destination itself.
fn target_path(root: &Path, entry_path: &str) -> PathBuf {
    let mut target = root.to_path_buf();
    for segment in entry_path.split('/').filter(|s| *s != ".") {
        target.push(segment);
    }
    target
}

/// Refuses to write through a symlink that sits between the destination and
/// the target. Archives written by `backup` never contain entries below a
/// symlink entry.
fn check_ancestors(root: &Path, target: &Path, entry_path: &str) -> Result<()> {
    let Ok(relative) = target.strip_prefix(root) else {
        return Err(ArchiverError::UnsafePath(entry_path.to_string()));
    };
    let mut current = root.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            break;
        }
        current.push(component);
        if is_symlink(&current) {
            return Err(ArchiverError::UnsafePath(format!("{entry_path} (parent {} is a symlink)", current.display())));
        }
    }
    Ok(())
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_symlink())
}

fn create_parent(target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| ArchiverError::io(parent, e))?;
    }
    Ok(())
}

/// A file entry replaces an existing symlink instead of writing through it.
fn remove_stale_link(target: &Path) -> Result<()> {
    if is_symlink(target) {
        fs::remove_file(target).map_err(|e| ArchiverError::io(target, e))?;
    }
    Ok(())
}

/// Errors from the archive side keep their own classification; anything
/// else came from writing the restored file.
fn tag_write(err: io::Error, target: &Path) -> ArchiverError {
    if crate::pipeline::is_tagged(&err) {
        ArchiverError::from(err)
    } else {
        ArchiverError::io(target, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{backup, BackupOptions};
    use crate::crypto::tests::fast_params;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    fn sample_tree(root: &Path) {
        fs::create_dir_all(root.join("docs/nested")).unwrap();
        fs::write(root.join("docs/readme.txt"), b"hello").unwrap();
        fs::write(root.join("docs/nested/data.bin"), vec![42u8; 100_000]).unwrap();
        fs::write(root.join("empty"), b"").unwrap();
    }

    #[test]
    fn target_path_maps_root_and_segments() {
        let root = Path::new("/restore");
        assert_eq!(target_path(root, "."), PathBuf::from("/restore"));
        assert_eq!(target_path(root, "a/b.txt"), PathBuf::from("/restore/a/b.txt"));
    }

    #[test]
    fn restore_recreates_tree() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        sample_tree(&src);
        let archive = dir.path().join("out.ark");
        backup(&BackupOptions::new(&src, &archive)).unwrap();

        let dst = dir.path().join("dst");
        let stats = restore(&RestoreOptions::new(&archive, &dst)).unwrap();
        assert_eq!(stats.files, 3);
        assert_eq!(stats.bytes, 100_005);
        assert_eq!(fs::read(dst.join("docs/readme.txt")).unwrap(), b"hello");
        assert_eq!(fs::read(dst.join("docs/nested/data.bin")).unwrap(), vec![42u8; 100_000]);
        assert_eq!(fs::read(dst.join("empty")).unwrap(), b"");
    }

    #[test]
    fn list_reports_headers_in_walk_order() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        sample_tree(&src);
        let archive = dir.path().join("out.ark");
        backup(&BackupOptions::new(&src, &archive)).unwrap();

        let entries = list(&RestoreOptions::new(&archive, dir.path())).unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec![".", "docs", "docs/nested", "docs/nested/data.bin", "docs/readme.txt", "empty"]);
        assert_eq!(entries[3].size, 100_000);
    }

    #[test]
    fn passphrase_symmetry() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        sample_tree(&src);
        let plain = dir.path().join("plain.ark");
        let sealed = dir.path().join("sealed.ark");
        backup(&BackupOptions::new(&src, &plain)).unwrap();
        backup(&BackupOptions::new(&src, &sealed).passphrase("pw").kdf(fast_params())).unwrap();

        let err = restore(&RestoreOptions::new(&plain, dir.path().join("a")).passphrase("pw")).unwrap_err();
        assert!(matches!(err, ArchiverError::NotEncrypted));
        let err = restore(&RestoreOptions::new(&sealed, dir.path().join("b"))).unwrap_err();
        assert!(matches!(err, ArchiverError::PassphraseRequired));
        let err = restore(&RestoreOptions::new(&sealed, dir.path().join("c")).passphrase("nope")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);

        restore(&RestoreOptions::new(&sealed, dir.path().join("d")).passphrase("pw")).unwrap();
        assert_eq!(fs::read(dir.path().join("d/docs/readme.txt")).unwrap(), b"hello");
    }

    #[test]
    fn missing_archive_is_io_error() {
        let dir = tempdir().unwrap();
        let err = restore(&RestoreOptions::new(dir.path().join("nope.ark"), dir.path())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[cfg(unix)]
    #[test]
    fn read_only_directory_is_restored_with_contents() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("locked")).unwrap();
        fs::write(src.join("locked/inside.txt"), b"x").unwrap();
        fs::set_permissions(src.join("locked"), fs::Permissions::from_mode(0o555)).unwrap();
        let archive = dir.path().join("out.ark");
        backup(&BackupOptions::new(&src, &archive)).unwrap();
        fs::set_permissions(src.join("locked"), fs::Permissions::from_mode(0o755)).unwrap();

        let dst = dir.path().join("dst");
        restore(&RestoreOptions::new(&archive, &dst)).unwrap();
        assert_eq!(fs::read(dst.join("locked/inside.txt")).unwrap(), b"x");
        let mode = fs::metadata(dst.join("locked")).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o555);
        fs::set_permissions(dst.join("locked"), fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn existing_symlink_in_destination_is_not_followed() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("sub/file.txt"), b"data").unwrap();
        let archive = dir.path().join("out.ark");
        backup(&BackupOptions::new(&src, &archive)).unwrap();

        let outside = dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        let dst = dir.path().join("dst");
        fs::create_dir_all(&dst).unwrap();
        std::os::unix::fs::symlink(&outside, dst.join("sub")).unwrap();

        let err = restore(&RestoreOptions::new(&archive, &dst)).unwrap_err();
        assert!(matches!(err, ArchiverError::UnsafePath(_)));
        assert!(!outside.join("file.txt").exists());
    }
}
