//! # Backup Pipeline
//!
//! Walks a source tree and streams it through the entry codec, the
//! compressor and (optionally) the encryptor into a single archive file.
//! Nothing is buffered beyond the fixed-size layer buffers: file contents are
//! copied straight from disk into the stack.

use crate::archive::EntryWriter;
use crate::common::{EntryKind, EntryStats};
use crate::compress::{ZstdStage, DEFAULT_LEVEL};
use crate::crypto::{EncryptionStage, KdfParams};
use crate::error::{ArchiverError, Result};
use crate::pipeline::{FileSink, FileSource, StageStack};
use crate::walk::PathWalker;

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::NamedTempFile;

/// Everything one backup run needs. Built once per invocation and never mutated.
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// File or directory to archive.
    pub source: PathBuf,
    /// Archive file to create (truncated if it exists).
    pub destination: PathBuf,
    /// zstd level; validated when the pipeline is built.
    pub compression_level: i32,
    /// Archive link targets instead of the links themselves.
    pub follow_symlinks: bool,
    /// Enables the encryption layer. Never written anywhere.
    pub passphrase: Option<String>,
    /// Write to a temporary file next to `destination` and rename it into
    /// place only on success. Without this a failed run leaves partial output.
    pub atomic: bool,
    /// Argon2 costs for the encryption layer.
    pub kdf: KdfParams,
}

impl BackupOptions {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            compression_level: DEFAULT_LEVEL,
            follow_symlinks: false,
            passphrase: None,
            atomic: false,
            kdf: KdfParams::default(),
        }
    }

    pub fn compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn atomic(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }

    pub fn kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// The write-side layers: encryption (if any) outermost, then compression.
    pub fn stage_stack(&self) -> Result<StageStack> {
        let mut stack = StageStack::new();
        if let Some(passphrase) = &self.passphrase {
            stack = stack.push(EncryptionStage::new(passphrase, self.kdf));
        }
        Ok(stack.push(ZstdStage::new(self.compression_level)?))
    }
}

/// The archive file being written, either in place or via a temporary file.
enum Output {
    Direct { path: PathBuf },
    Staged { temp: NamedTempFile, destination: PathBuf },
}

impl Output {
    fn create(destination: &Path, atomic: bool) -> Result<(Self, File)> {
        if !atomic {
            let file = File::create(destination).map_err(|e| ArchiverError::io(destination, e))?;
            return Ok((Output::Direct { path: destination.to_path_buf() }, file));
        }
        let dir = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let temp = NamedTempFile::new_in(&dir).map_err(|e| ArchiverError::io(&dir, e))?;
        let file = temp.as_file().try_clone().map_err(|e| ArchiverError::io(temp.path(), e))?;
        Ok((Output::Staged { temp, destination: destination.to_path_buf() }, file))
    }

    fn path(&self) -> &Path {
        match self {
            Output::Direct { path } => path,
            Output::Staged { temp, .. } => temp.path(),
        }
    }

    /// Moves a staged archive into place. A no-op for direct output.
    fn commit(self) -> Result<()> {
        if let Output::Staged { temp, destination } = self {
            temp.persist(&destination)?;
        }
        Ok(())
    }
}

/// Archives `options.source` into `options.destination`.
///
/// The first error aborts the run. The layer stack is still finalized
/// innermost-first on the way out; whatever reached the destination stays
/// there unless [`BackupOptions::atomic`] is set.
pub fn backup(options: &BackupOptions) -> Result<EntryStats> {
    let started = Instant::now();
    let stack = options.stage_stack()?;
    let walker = PathWalker::new(&options.source, options.follow_symlinks)?;

    let (output, file) = Output::create(&options.destination, options.atomic)?;
    tracing::info!(
        source = %options.source.display(),
        destination = %options.destination.display(),
        layers = %stack.describe(),
        level = options.compression_level,
        "starting backup"
    );

    let sink = stack.open_sink(Box::new(FileSink::new(file, output.path())))?;
    let mut writer = EntryWriter::new(sink)?;
    let mut stats = EntryStats::default();

    for item in walker.exclude(output.path()) {
        let item = item?;
        let entry = item.to_entry()?;
        tracing::debug!(path = %entry.path, kind = %entry.kind, size = entry.size, "archiving");

        if entry.kind == EntryKind::File {
            let mut source = FileSource::open(&item.absolute_path)?;
            writer.write_entry(&entry, Some(&mut source))?;
        } else {
            if entry.kind == EntryKind::Other {
                tracing::warn!(path = %entry.path, "archiving special file as header only");
            }
            writer.write_entry(&entry, None)?;
        }
        stats.record(&entry);
    }

    writer.finish()?.finish()?;
    output.commit()?;

    tracing::info!(%stats, elapsed = ?started.elapsed(), "backup complete");
    Ok(stats)
}

/// Size of the archive at `path`, for reporting.
pub fn archive_size(path: &Path) -> Result<u64> {
    Ok(fs::metadata(path).map_err(|e| ArchiverError::io(path, e))?.len())
}
