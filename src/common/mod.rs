//! Common types shared by the walker, the entry codec and both pipelines.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of filesystem object an [`Entry`] describes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    /// Sockets, FIFOs, device nodes. Archived as a header only and skipped on restore.
    Other,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryKind::File => "file",
            EntryKind::Dir => "dir",
            EntryKind::Symlink => "symlink",
            EntryKind::Other => "other",
        };
        f.pad(name)
    }
}

/// Metadata for a single filesystem object within the archive.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Archive-root-relative path, `/`-separated. The root directory itself is `"."`.
    pub path: String,
    pub kind: EntryKind,
    /// Permission bits (`st_mode & 0o7777`).
    pub mode: u32,
    /// Payload length. Always 0 for anything but [`EntryKind::File`].
    pub size: u64,
    /// Symlink target, stored verbatim. Empty for anything but [`EntryKind::Symlink`].
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub link_target: String,
}

impl Entry {
    pub fn file(path: impl Into<String>, mode: u32, size: u64) -> Self {
        Self { path: path.into(), kind: EntryKind::File, mode, size, link_target: String::new() }
    }

    pub fn dir(path: impl Into<String>, mode: u32) -> Self {
        Self { path: path.into(), kind: EntryKind::Dir, mode, size: 0, link_target: String::new() }
    }

    pub fn symlink(path: impl Into<String>, mode: u32, target: impl Into<String>) -> Self {
        Self { path: path.into(), kind: EntryKind::Symlink, mode, size: 0, link_target: target.into() }
    }

    pub fn other(path: impl Into<String>, mode: u32) -> Self {
        Self { path: path.into(), kind: EntryKind::Other, mode, size: 0, link_target: String::new() }
    }
}

/// Per-run counters reported by backup, restore and list.
#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EntryStats {
    pub files: u64,
    pub directories: u64,
    pub symlinks: u64,
    /// Entries that were archived or read but not materialized (see [`EntryKind::Other`]).
    pub skipped: u64,
    /// Total regular-file payload bytes.
    pub bytes: u64,
}

impl EntryStats {
    pub fn record(&mut self, entry: &Entry) {
        match entry.kind {
            EntryKind::File => {
                self.files += 1;
                self.bytes += entry.size;
            }
            EntryKind::Dir => self.directories += 1,
            EntryKind::Symlink => self.symlinks += 1,
            EntryKind::Other => self.skipped += 1,
        }
    }

    pub fn entries(&self) -> u64 {
        self.files + self.directories + self.symlinks + self.skipped
    }
}

impl fmt::Display for EntryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files ({} bytes), {} directories, {} symlinks, {} skipped",
            self.files, self.bytes, self.directories, self.symlinks, self.skipped
        )
    }
}
