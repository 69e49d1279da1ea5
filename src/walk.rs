//! Filesystem enumeration for backups.
//!
//! [`PathWalker`] yields one [`WalkItem`] per filesystem object below a root,
//! depth-first, parents before children. The first error ends the walk.

use crate::common::{Entry, EntryKind};
use crate::error::{ArchiverError, Result};
use crate::fsx;

use std::fs::{self, Metadata};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// One object found by the walker.
#[derive(Debug)]
pub struct WalkItem {
    pub absolute_path: PathBuf,
    /// Archive-relative, `/`-separated path (`"."` for a directory root).
    pub relative_path: String,
    pub metadata: Metadata,
}

impl WalkItem {
    pub fn kind(&self) -> EntryKind {
        let ft = self.metadata.file_type();
        if ft.is_file() {
            EntryKind::File
        } else if ft.is_dir() {
            EntryKind::Dir
        } else if ft.is_symlink() {
            EntryKind::Symlink
        } else {
            EntryKind::Other
        }
    }

    /// Builds the archive header for this item. Reads the link target for symlinks.
    pub fn to_entry(&self) -> Result<Entry> {
        let mode = fsx::mode_of(&self.metadata);
        let path = self.relative_path.clone();
        Ok(match self.kind() {
            EntryKind::File => Entry::file(path, mode, self.metadata.len()),
            EntryKind::Dir => Entry::dir(path, mode),
            EntryKind::Other => Entry::other(path, mode),
            EntryKind::Symlink => {
                let target = fs::read_link(&self.absolute_path)
                    .map_err(|e| ArchiverError::io(&self.absolute_path, e))?;
                let target = target.into_os_string().into_string().map_err(|raw| ArchiverError::NonUtf8Path(raw.into()))?;
                Entry::symlink(path, mode, target)
            }
        })
    }
}

/// Depth-first walk over a file or directory tree.
pub struct PathWalker {
    root: PathBuf,
    base: PathBuf,
    follow_symlinks: bool,
    exclude: Option<PathBuf>,
}

impl PathWalker {
    /// Prepares a walk over `root`. Fails immediately if `root` cannot be stat'ed.
    ///
    /// With `follow_symlinks` the metadata (and, for directories, the contents) of
    /// link targets is reported instead of the links themselves; this applies to
    /// `root` too.
    pub fn new(root: impl Into<PathBuf>, follow_symlinks: bool) -> Result<Self> {
        let root = root.into();
        let metadata = if follow_symlinks { fs::metadata(&root) } else { fs::symlink_metadata(&root) };
        let metadata = metadata.map_err(|e| ArchiverError::io(&root, e))?;

        let base = if metadata.is_dir() {
            root.clone()
        } else {
            root.parent().map(Path::to_path_buf).unwrap_or_default()
        };
        Ok(Self { root, base, follow_symlinks, exclude: None })
    }

    /// Skips the file at `path` (compared after canonicalization). Used to keep a
    /// backup from archiving its own output.
    pub fn exclude(mut self, path: &Path) -> Self {
        self.exclude = fs::canonicalize(path).ok();
        self
    }

    fn is_excluded(&self, path: &Path) -> bool {
        let Some(excluded) = &self.exclude else { return false };
        if path.file_name() != excluded.file_name() {
            return false;
        }
        fs::canonicalize(path).map(|p| &p == excluded).unwrap_or(false)
    }

    fn relative(&self, path: &Path) -> Result<String> {
        let rel = path.strip_prefix(&self.base).map_err(|_| ArchiverError::StripPrefix {
            prefix: self.base.clone(),
            path: path.to_path_buf(),
        })?;
        relative_to_string(rel)
    }
}

impl IntoIterator for PathWalker {
    type Item = Result<WalkItem>;
    type IntoIter = Walk;

    fn into_iter(self) -> Walk {
        let inner = WalkDir::new(&self.root)
            .follow_links(self.follow_symlinks)
            .follow_root_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter();
        Walk { walker: self, inner, failed: false }
    }
}

/// Iterator returned by [`PathWalker::into_iter`].
pub struct Walk {
    walker: PathWalker,
    inner: walkdir::IntoIter,
    failed: bool,
}

impl Iterator for Walk {
    type Item = Result<WalkItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let item = match self.inner.next()? {
                Ok(entry) => self.item_for(entry),
                Err(e) => Err(e.into()),
            };
            match item {
                Ok(Some(item)) => return Some(Ok(item)),
                Ok(None) => continue,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl Walk {
    fn item_for(&self, entry: walkdir::DirEntry) -> Result<Option<WalkItem>> {
        if entry.file_type().is_file() && self.walker.is_excluded(entry.path()) {
            tracing::debug!(path = %entry.path().display(), "skipping archive output");
            return Ok(None);
        }
        let metadata = entry.metadata()?;
        let relative_path = self.walker.relative(entry.path())?;
        Ok(Some(WalkItem { absolute_path: entry.into_path(), relative_path, metadata }))
    }
}

/// Joins the normal components of `rel` with `/`. An empty path becomes `"."`.
fn relative_to_string(rel: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(name) => {
                let name = name.to_str().ok_or_else(|| ArchiverError::NonUtf8Path(rel.to_path_buf()))?;
                parts.push(name);
            }
            Component::CurDir => {}
            _ => return Err(ArchiverError::UnsafePath(rel.display().to_string())),
        }
    }
    if parts.is_empty() {
        Ok(".".to_string())
    } else {
        Ok(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    fn collect(walker: PathWalker) -> Vec<(String, EntryKind)> {
        walker
            .into_iter()
            .map(|item| {
                let item = item.unwrap();
                let kind = item.kind();
                (item.relative_path, kind)
            })
            .collect()
    }

    #[test]
    fn walks_directory_depth_first() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        File::create(dir.path().join("a.txt")).unwrap();
        File::create(dir.path().join("sub/b.txt")).unwrap();

        let items = collect(PathWalker::new(dir.path(), false).unwrap());
        assert_eq!(
            items,
            vec![
                (".".to_string(), EntryKind::Dir),
                ("a.txt".to_string(), EntryKind::File),
                ("sub".to_string(), EntryKind::Dir),
                ("sub/b.txt".to_string(), EntryKind::File),
            ]
        );
    }

    #[test]
    fn single_file_is_relative_to_parent() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("secret.txt");
        fs::write(&file, b"xyz").unwrap();

        let items = collect(PathWalker::new(&file, false).unwrap());
        assert_eq!(items, vec![("secret.txt".to_string(), EntryKind::File)]);
    }

    #[test]
    fn missing_root_fails_up_front() {
        let dir = tempdir().unwrap();
        let err = PathWalker::new(dir.path().join("nope"), false).err().unwrap();
        assert!(matches!(err, ArchiverError::Io { .. }));
    }

    #[test]
    fn excluded_file_is_skipped() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("keep.txt"), b"1").unwrap();
        let out = dir.path().join("out.ark");
        fs::write(&out, b"").unwrap();

        let items = collect(PathWalker::new(dir.path(), false).unwrap().exclude(&out));
        assert!(items.iter().all(|(p, _)| p != "out.ark"));
        assert!(items.iter().any(|(p, _)| p == "keep.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_policy() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("target.txt"), b"hello").unwrap();
        std::os::unix::fs::symlink("target.txt", dir.path().join("link")).unwrap();

        let kept: Vec<_> = PathWalker::new(dir.path(), false).unwrap().into_iter().map(|i| i.unwrap()).collect();
        let link = kept.iter().find(|i| i.relative_path == "link").unwrap();
        let entry = link.to_entry().unwrap();
        assert_eq!(entry.kind, EntryKind::Symlink);
        assert_eq!(entry.link_target, "target.txt");
        assert_eq!(entry.size, 0);

        let followed: Vec<_> = PathWalker::new(dir.path(), true).unwrap().into_iter().map(|i| i.unwrap()).collect();
        let link = followed.iter().find(|i| i.relative_path == "link").unwrap();
        let entry = link.to_entry().unwrap();
        assert_eq!(entry.kind, EntryKind::File);
        assert_eq!(entry.size, 5);
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_aborts_when_following() {
        let dir = tempdir().unwrap();
        std::os::unix::fs::symlink("missing", dir.path().join("broken")).unwrap();
        let results: Vec<_> = PathWalker::new(dir.path(), true).unwrap().into_iter().collect();
        assert!(results.last().unwrap().is_err());
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
    }
}
