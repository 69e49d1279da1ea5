use std::io;
use std::path::{Path, PathBuf};

/// The primary error type for all operations in the `arkive` crate.
#[derive(Debug, thiserror::Error)]
pub enum ArchiverError {
    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened, when one is known.
    #[error("I/O error{}: {source}", at_path(.path))]
    Io { source: io::Error, path: PathBuf },

    /// An error occurred when trying to strip a prefix from a file path.
    #[error("could not strip prefix '{}' from path '{}'", .prefix.display(), .path.display())]
    StripPrefix { prefix: PathBuf, path: PathBuf },

    /// The archive framing (entry codec or compression frame) is corrupt or truncated.
    #[error("corrupt or truncated archive: {0}")]
    Format(String),

    /// A regular file yielded a different number of bytes than its header announced.
    #[error("size of '{path}' changed while archiving: expected {expected} bytes, got {actual}")]
    SizeMismatch { path: String, expected: u64, actual: u64 },

    /// An entry path would escape the restore root or is otherwise malformed.
    #[error("refusing unsafe entry path '{0}'")]
    UnsafePath(String),

    /// Archive entry names are UTF-8; this path cannot be represented.
    #[error("path is not valid UTF-8: '{}'", .0.display())]
    NonUtf8Path(PathBuf),

    /// A path or link target exceeds the codec's length limit.
    #[error("{what} is {len} bytes long, the limit is {max}")]
    TooLong { what: &'static str, len: usize, max: usize },

    /// Wrong passphrase, or the ciphertext was modified or truncated.
    #[error("authentication failed: wrong passphrase or tampered archive")]
    Authentication,

    /// A passphrase was supplied for an archive that was written without one.
    #[error("archive is not encrypted, but a passphrase was supplied")]
    NotEncrypted,

    /// The archive is encrypted and no passphrase was supplied.
    #[error("archive is encrypted, but no passphrase was supplied")]
    PassphraseRequired,

    /// The requested compression level is outside what zstd supports.
    #[error("compression level {level} is outside the supported range {min}..={max}")]
    InvalidCompressionLevel { level: i32, min: i32, max: i32 },

    /// Key derivation parameters were rejected or the derivation itself failed.
    #[error("key derivation failed: {0}")]
    Kdf(String),

    /// An entry type that restore does not know how to materialize.
    #[error("unsupported entry '{path}' skipped")]
    UnsupportedEntry { path: String },
}

/// Coarse classification of [`ArchiverError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Format,
    Authentication,
    Permission,
    UnsupportedEntry,
    Config,
}

pub type Result<T, E = ArchiverError> = std::result::Result<T, E>;

fn at_path(path: &Path) -> String {
    if path.as_os_str().is_empty() {
        String::new()
    } else {
        format!(" on path '{}'", path.display())
    }
}

impl ArchiverError {
    /// Wraps an I/O error together with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ArchiverError::Io { source, path: path.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiverError::Io { source, .. } if source.kind() == io::ErrorKind::PermissionDenied => {
                ErrorKind::Permission
            }
            ArchiverError::Io { .. } | ArchiverError::StripPrefix { .. } => ErrorKind::Io,
            ArchiverError::Format(_)
            | ArchiverError::SizeMismatch { .. }
            | ArchiverError::UnsafePath(_)
            | ArchiverError::NonUtf8Path(_)
            | ArchiverError::TooLong { .. } => ErrorKind::Format,
            ArchiverError::Authentication
            | ArchiverError::NotEncrypted
            | ArchiverError::PassphraseRequired => ErrorKind::Authentication,
            ArchiverError::InvalidCompressionLevel { .. } | ArchiverError::Kdf(_) => ErrorKind::Config,
            ArchiverError::UnsupportedEntry { .. } => ErrorKind::UnsupportedEntry,
        }
    }

    /// Packs this error into an `io::Error` so it can cross a `Read`/`Write` boundary.
    /// `From<io::Error>` unpacks it again on the other side.
    pub(crate) fn into_io(self) -> io::Error {
        let kind = match &self {
            ArchiverError::Io { source, .. } => source.kind(),
            ArchiverError::Authentication | ArchiverError::Format(_) => io::ErrorKind::InvalidData,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }
}

impl From<io::Error> for ArchiverError {
    fn from(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<ArchiverError>()) {
            return ArchiverError::Io { source: err, path: PathBuf::new() }; // Generic path
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<ArchiverError>()) {
            Some(Ok(archiver)) => *archiver,
            Some(Err(other)) => ArchiverError::Io { source: io::Error::new(kind, other), path: PathBuf::new() },
            None => ArchiverError::Io { source: kind.into(), path: PathBuf::new() },
        }
    }
}

impl From<walkdir::Error> for ArchiverError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(Path::to_path_buf).unwrap_or_default();
        ArchiverError::Io { source: err.into(), path }
    }
}

impl From<tempfile::PersistError> for ArchiverError {
    fn from(err: tempfile::PersistError) -> Self {
        let path = err.file.path().to_path_buf();
        ArchiverError::Io { source: err.error, path }
    }
}
